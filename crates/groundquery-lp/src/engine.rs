//! Solver engine: simplex relaxations driven by depth-first branch and bound.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{LpError, Result};
use crate::model::{LinearProgram, VarId, VarKind};
use crate::simplex::solve_relaxation;

const INTEGRALITY_TOL: f64 = 1e-6;

/// Work limits for one solve. Hitting any of them is reported as
/// [`LpError::LimitReached`]; no partial answer is returned.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveLimits {
    pub time_limit: Option<Duration>,
    /// Maximum number of branch-and-bound nodes to explore.
    pub node_limit: Option<usize>,
    /// Maximum simplex pivots per relaxation.
    pub max_simplex_iterations: usize,
}

impl Default for SolveLimits {
    fn default() -> Self {
        Self {
            time_limit: None,
            node_limit: None,
            max_simplex_iterations: 100_000,
        }
    }
}

impl SolveLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = Some(limit);
        self
    }

    pub fn with_max_simplex_iterations(mut self, iterations: usize) -> Self {
        self.max_simplex_iterations = iterations;
        self
    }
}

/// An optimal (integral where required) solution.
#[derive(Clone, Debug, PartialEq)]
pub struct LpSolution {
    values: Vec<f64>,
    objective: f64,
    nodes: usize,
}

impl LpSolution {
    pub fn value(&self, var: VarId) -> f64 {
        self.values.get(var.index()).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Branch-and-bound nodes explored.
    pub fn nodes_explored(&self) -> usize {
        self.nodes
    }
}

/// One solver engine. Engines are handed out by [`crate::EnginePool`].
#[derive(Debug)]
pub struct SolverEngine {
    id: usize,
    solves: usize,
}

impl SolverEngine {
    pub fn new(id: usize) -> Self {
        Self { id, solves: 0 }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of solves run on this engine.
    pub fn solves(&self) -> usize {
        self.solves
    }

    /// Maximize `program`, respecting integrality of binary variables.
    pub fn solve(&mut self, program: &LinearProgram, limits: &SolveLimits) -> Result<LpSolution> {
        self.solves += 1;
        let start = Instant::now();
        let root: Vec<(f64, f64)> = program
            .variables()
            .iter()
            .map(|v| (v.lower, v.upper))
            .collect();

        let mut stack = vec![root];
        let mut incumbent: Option<(Vec<f64>, f64)> = None;
        let mut nodes = 0;

        while let Some(bounds) = stack.pop() {
            if let Some(limit) = limits.node_limit {
                if nodes >= limit {
                    return Err(LpError::LimitReached {
                        what: format!("node limit of {}", limit),
                    });
                }
            }
            if let Some(limit) = limits.time_limit {
                if start.elapsed() > limit {
                    return Err(LpError::LimitReached {
                        what: format!("time limit of {:?}", limit),
                    });
                }
            }
            nodes += 1;

            let relaxation = match solve_relaxation(program, &bounds, limits.max_simplex_iterations)
            {
                Ok(relaxation) => relaxation,
                Err(LpError::Infeasible) => continue,
                Err(e) => return Err(e),
            };
            if let Some((_, best)) = &incumbent {
                if relaxation.objective <= *best + INTEGRALITY_TOL {
                    continue;
                }
            }

            let fractional = program
                .variables()
                .iter()
                .enumerate()
                .filter(|(_, v)| v.kind == VarKind::Binary)
                .map(|(j, _)| (j, relaxation.values[j]))
                .find(|(_, x)| (x - x.round()).abs() > INTEGRALITY_TOL);

            match fractional {
                None => {
                    let mut values = relaxation.values;
                    for (value, variable) in values.iter_mut().zip(program.variables()) {
                        if variable.kind == VarKind::Binary {
                            *value = value.round();
                        }
                    }
                    let objective = program.objective_value(&values);
                    trace!(engine = self.id, nodes, objective, "new incumbent");
                    incumbent = Some((values, objective));
                }
                Some((j, x)) => {
                    let mut down = bounds.clone();
                    down[j].1 = x.floor();
                    let mut up = bounds;
                    up[j].0 = x.ceil();
                    // The branch nearer to the relaxed value is explored first.
                    if x - x.floor() < 0.5 {
                        stack.push(up);
                        stack.push(down);
                    } else {
                        stack.push(down);
                        stack.push(up);
                    }
                }
            }
        }

        match incumbent {
            Some((values, objective)) => Ok(LpSolution {
                values,
                objective,
                nodes,
            }),
            None => Err(LpError::Infeasible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Comparison, LinearExpr};
    use approx::assert_abs_diff_eq;

    fn knapsack() -> (LinearProgram, Vec<VarId>) {
        // max 5a + 4b + 3c  s.t. 2a + 3b + c <= 5, binary
        let mut lp = LinearProgram::new();
        let vars = lp.add_variables("item", 3, VarKind::Binary);
        for (&var, value) in vars.iter().zip([5.0, 4.0, 3.0]) {
            lp.add_objective_term(var, value).unwrap();
        }
        let weight = LinearExpr::new()
            .term(vars[0], 2.0)
            .term(vars[1], 3.0)
            .term(vars[2], 1.0);
        lp.add_constraint(weight, Comparison::LessEqual, 5.0).unwrap();
        (lp, vars)
    }

    #[test]
    fn test_branch_and_bound_knapsack() {
        let (lp, vars) = knapsack();
        let solution = SolverEngine::new(0).solve(&lp, &SolveLimits::default()).unwrap();
        assert_abs_diff_eq!(solution.objective(), 9.0, epsilon = 1e-9);
        assert_eq!(solution.value(vars[0]), 1.0);
        assert_eq!(solution.value(vars[1]), 1.0);
        assert_eq!(solution.value(vars[2]), 0.0);
        assert!(lp.is_feasible(solution.values(), 1e-9));
        assert!(solution.nodes_explored() > 1);
    }

    #[test]
    fn test_relaxation_is_fractional() {
        let (lp, _) = knapsack();
        let solution = SolverEngine::new(0)
            .solve(&lp.relaxed(), &SolveLimits::default())
            .unwrap();
        assert!(solution.objective() > 9.0 + 1e-6);
        assert_eq!(solution.nodes_explored(), 1);
    }

    #[test]
    fn test_node_limit_reports_no_solution() {
        let (lp, _) = knapsack();
        let limits = SolveLimits::new().with_node_limit(1);
        assert!(matches!(
            SolverEngine::new(0).solve(&lp, &limits),
            Err(LpError::LimitReached { .. })
        ));
    }

    #[test]
    fn test_exactly_one() {
        let mut lp = LinearProgram::new();
        let vars = lp.add_variables("x", 3, VarKind::Binary);
        for (i, &var) in vars.iter().enumerate() {
            lp.add_objective_term(var, i as f64 + 1.0).unwrap();
        }
        lp.add_constraint(LinearExpr::sum(vars.clone()), Comparison::Equal, 1.0)
            .unwrap();
        let mut engine = SolverEngine::new(3);
        let solution = engine.solve(&lp, &SolveLimits::default()).unwrap();
        assert_eq!(solution.values(), &[0.0, 0.0, 1.0]);
        assert_eq!(engine.solves(), 1);
        assert_eq!(engine.id(), 3);
    }

    #[test]
    fn test_integer_infeasible() {
        // 2x = 1 has a relaxed solution but no binary one.
        let mut lp = LinearProgram::new();
        let x = lp.add_variable("x", VarKind::Binary);
        lp.add_constraint(LinearExpr::new().term(x, 2.0), Comparison::Equal, 1.0)
            .unwrap();
        assert_eq!(
            SolverEngine::new(0).solve(&lp, &SolveLimits::default()),
            Err(LpError::Infeasible)
        );
    }
}
