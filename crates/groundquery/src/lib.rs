//! Structured-query inference over weighted relations.
//!
//! A query such as "the red object left of a round one" is represented as a
//! tree of combinators over grounded relation weights:
//!
//! - **Predicate**: leaf holding the log-space weights of a relation
//! - **Conjunction**: AND of its children through a boolean truth table
//! - **Existential**: projects variables out of its child (OR over witnesses)
//! - **Determiner**: `the` / `a`, selecting exactly one output
//!
//! The tree is decoded either exactly, with one integer linear program
//! solved on an engine leased from an [`EnginePool`], or approximately, by
//! dual decomposition followed by local decoding.
//!
//! # Architecture
//!
//! ```text
//! CombinatorNode ──► IlpInference ──► LinearProgram ──► EngineLease::solve
//!       │                                                     │
//!       └──► DualDecompositionSolver ──► locally_decode_variables
//!                                                             ▼
//!                                            AssignmentTree<DenseTensor>
//! ```
//!
//! # Example
//!
//! ```
//! use groundquery::{CombinatorNode, EnginePool};
//! use groundquery_tensor::{DiscreteVariable, VariableSet, WeightedRelationTable};
//!
//! let entities = DiscreteVariable::entity("entity", &["x", "y"]);
//! let red = WeightedRelationTable::from_boolean_weights(
//!     VariableSet::singleton(0, entities),
//!     1,
//!     &[(0.0, 2.0), (1.0, 0.0)],
//! )?;
//! let red = CombinatorNode::predicate("red", red, false)?;
//! let the_red = CombinatorNode::determiner(red, true)?;
//!
//! let pool = EnginePool::new(2);
//! let assignment = the_red.ilp_inference(&pool, false, true)?;
//! assert_eq!(the_red.assignment_string(&assignment)?, "red: {[x] }");
//! # Ok::<(), groundquery::QueryError>(())
//! ```

mod assignment;
mod config;
mod conjunction;
mod dual_decomposition;
mod error;
mod existential;
mod ilp;
mod node;

pub use assignment::AssignmentTree;
pub use config::{
    DualDecompositionConfig, IlpConfig, InferenceConfig, InferenceStrategy, PoolConfig,
    CONFIG_ENV_VAR, CONFIG_FILE_NAME,
};
pub use conjunction::{
    and_truth_table, ConjunctionFactor, AND_INPUT1_VAR, AND_INPUT2_VAR, AND_OUTPUT_VAR,
};
pub use dual_decomposition::{
    DualDecompositionReport, DualDecompositionSolver, DualDecompositionStatus,
};
pub use error::{QueryError, Result};
pub use existential::ExistentialFactor;
pub use groundquery_lp::{EnginePool, PoolStats, SolveLimits};
pub use ilp::IlpInference;
pub use node::{Combinator, CombinatorNode, Relation};
