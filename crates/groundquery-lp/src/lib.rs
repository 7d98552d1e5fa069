//! Linear and 0/1 integer programming for query inference.
//!
//! A [`LinearProgram`] is built from bounded variables, linear constraints
//! and a maximization objective, then solved by a [`SolverEngine`]:
//!
//! - continuous relaxations with a dense two-phase simplex (Bland's rule)
//! - integrality of [`VarKind::Binary`] variables by depth-first branch and
//!   bound, nearest-rounding branch first
//!
//! Engines are leased from an [`EnginePool`] created once at startup. A lease
//! returns its engine when dropped; an exhausted pool is an error, not a wait.
//!
//! ```
//! use groundquery_lp::{Comparison, EnginePool, LinearExpr, LinearProgram, SolveLimits, VarKind};
//!
//! let mut lp = LinearProgram::new();
//! let a = lp.add_variable("a", VarKind::Binary);
//! let b = lp.add_variable("b", VarKind::Binary);
//! lp.add_objective_term(a, 1.0).unwrap();
//! lp.add_objective_term(b, 2.0).unwrap();
//! lp.add_constraint(LinearExpr::sum([a, b]), Comparison::LessEqual, 1.0).unwrap();
//!
//! let pool = EnginePool::new(4);
//! let solution = pool.acquire().unwrap().solve(&lp, &SolveLimits::default()).unwrap();
//! assert_eq!(solution.value(b), 1.0);
//! ```

mod engine;
mod error;
mod model;
mod pool;
mod simplex;

pub use engine::{LpSolution, SolveLimits, SolverEngine};
pub use error::{LpError, Result};
pub use model::{Comparison, Constraint, LinearExpr, LinearProgram, VarId, VarKind, Variable};
pub use pool::{EngineLease, EnginePool, PoolStats, DEFAULT_POOL_SIZE};
