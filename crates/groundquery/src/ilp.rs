//! MAP inference over a whole query tree with a single (integer) linear program.
//!
//! Every node contributes one 0/1 variable per index assignment of its local
//! table ("this grounding is true"), an objective term `w(true) - w(false)`
//! per variable, and the constraints tying it to its children.

use std::time::Duration;

use groundquery_lp::{
    Comparison, EnginePool, LinearExpr, LinearProgram, LpSolution, SolveLimits, VarId, VarKind,
};
use groundquery_tensor::{DenseTensor, FALSE_INDEX, TRUE_INDEX};
use tracing::{debug, debug_span, warn};

use crate::assignment::AssignmentTree;
use crate::config::InferenceConfig;
use crate::error::{QueryError, Result};
use crate::node::{Combinator, CombinatorNode};

/// ILP inference settings.
#[derive(Clone, Debug, PartialEq)]
pub struct IlpInference {
    use_lp_relaxation: bool,
    apply_weak_supervision_constraints: bool,
    limits: SolveLimits,
}

impl Default for IlpInference {
    fn default() -> Self {
        Self {
            use_lp_relaxation: false,
            apply_weak_supervision_constraints: true,
            limits: SolveLimits::default(),
        }
    }
}

impl IlpInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            use_lp_relaxation: config.ilp.use_lp_relaxation,
            apply_weak_supervision_constraints: config.ilp.apply_weak_supervision_constraints,
            limits: config.solve_limits(),
        }
    }

    /// Solve the continuous relaxation and round, instead of the exact ILP.
    pub fn with_lp_relaxation(mut self, enabled: bool) -> Self {
        self.use_lp_relaxation = enabled;
        self
    }

    /// Require determiners to select exactly one output.
    pub fn with_weak_supervision_constraints(mut self, enabled: bool) -> Self {
        self.apply_weak_supervision_constraints = enabled;
        self
    }

    pub fn with_limits(mut self, limits: SolveLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.limits = self.limits.with_time_limit(limit);
        self
    }

    pub fn limits(&self) -> &SolveLimits {
        &self.limits
    }

    /// Build the program for `node`, with the variables of every node laid
    /// out in a tree shaped like `node`.
    pub fn build_program(
        &self,
        node: &CombinatorNode,
    ) -> Result<(LinearProgram, AssignmentTree<Vec<VarId>>)> {
        let mut program = LinearProgram::new();
        let vars = self.augment(node, &mut program)?;
        Ok((program, vars))
    }

    /// Solve on an engine leased from `pool` and decode the solution. The
    /// tree is not modified.
    pub fn solve(
        &self,
        node: &CombinatorNode,
        pool: &EnginePool,
    ) -> Result<AssignmentTree<DenseTensor>> {
        let span = debug_span!("ilp_inference", node = %node);
        let _guard = span.enter();

        let (program, vars) = self.build_program(node)?;
        debug!(
            variables = program.num_variables(),
            constraints = program.num_constraints(),
            integer = program.num_integer_variables(),
            "solving query program"
        );

        let mut lease = pool.acquire()?;
        let solution = match lease.solve(&program, &self.limits) {
            Ok(solution) => solution,
            Err(e) => {
                warn!(error = %e, slot = lease.slot(), "no solution for query program");
                return Err(e.into());
            }
        };
        drop(lease);

        debug!(
            objective = solution.objective(),
            nodes = solution.nodes_explored(),
            "query program solved"
        );
        decode(node, &vars, &solution)
    }

    fn augment(
        &self,
        node: &CombinatorNode,
        program: &mut LinearProgram,
    ) -> Result<AssignmentTree<Vec<VarId>>> {
        let children = node
            .subtrees()
            .iter()
            .map(|subtree| self.augment(subtree, program))
            .collect::<Result<Vec<_>>>()?;
        let vars = self.add_local_weights(node, program)?;

        match node.kind() {
            Combinator::Predicate => {}
            Combinator::Conjunction(factor) => {
                let child_vars: Vec<&Vec<VarId>> = children.iter().map(|c| c.value()).collect();
                factor.add_ilp_constraints(
                    node.local_weights(),
                    node.subtrees(),
                    &vars,
                    &child_vars,
                    program,
                )?;
            }
            Combinator::Existential(factor) => {
                let (subtree, child) = only_child(node, &children)?;
                factor.add_ilp_constraints(
                    node.local_weights(),
                    subtree.local_weights(),
                    &vars,
                    child,
                    program,
                )?;
            }
            Combinator::Determiner { force_child_unique } => {
                let (_, child) = only_child(node, &children)?;
                self.add_determiner_constraints(*force_child_unique, &vars, child, program)?;
            }
        }
        Ok(AssignmentTree::new(vars, children))
    }

    /// One variable per index assignment with objective `w(true) - w(false)`.
    /// An infinite coefficient fixes the variable instead.
    fn add_local_weights(
        &self,
        node: &CombinatorNode,
        program: &mut LinearProgram,
    ) -> Result<Vec<VarId>> {
        let weights = node.local_weights();
        weights.value_num()?;
        let kind = if self.use_lp_relaxation {
            VarKind::Continuous
        } else {
            VarKind::Binary
        };
        let vars = program.add_variables(&node.to_string(), weights.num_index_assignments(), kind);

        for (i, &var) in vars.iter().enumerate() {
            let mut key = weights.linear_index_to_assignment(i)?;
            key.push(FALSE_INDEX);
            let false_weight = weights.tensor().get(&key)?;
            key.pop();
            key.push(TRUE_INDEX);
            let true_weight = weights.tensor().get(&key)?;

            let coefficient = true_weight - false_weight;
            if coefficient.is_nan() {
                return Err(QueryError::NumericInvariantViolation(format!(
                    "objective of {} at {:?} combines weights {} and {}",
                    node, key, true_weight, false_weight
                )));
            }
            if coefficient.is_infinite() {
                let fixed = if coefficient > 0.0 { 1.0 } else { 0.0 };
                program.fix_variable(var, fixed)?;
            } else {
                program.add_objective_term(var, coefficient)?;
            }
        }
        Ok(vars)
    }

    /// The output is a subset of the child. With weak supervision exactly one
    /// output is selected, and `the` also selects exactly one child.
    fn add_determiner_constraints(
        &self,
        force_child_unique: bool,
        vars: &[VarId],
        child_vars: &[VarId],
        program: &mut LinearProgram,
    ) -> Result<()> {
        if vars.len() != child_vars.len() {
            return Err(QueryError::InvalidTree(format!(
                "determiner has {} variables but its child has {}",
                vars.len(),
                child_vars.len()
            )));
        }
        for (&mine, &child) in vars.iter().zip(child_vars) {
            program.add_constraint(
                LinearExpr::new().term(child, 1.0).term(mine, -1.0),
                Comparison::GreaterEqual,
                0.0,
            )?;
        }
        if self.apply_weak_supervision_constraints {
            program.add_constraint(LinearExpr::sum(vars.iter().copied()), Comparison::Equal, 1.0)?;
            if force_child_unique {
                program.add_constraint(
                    LinearExpr::sum(child_vars.iter().copied()),
                    Comparison::Equal,
                    1.0,
                )?;
            }
        }
        Ok(())
    }
}

fn only_child<'a>(
    node: &'a CombinatorNode,
    children: &'a [AssignmentTree<Vec<VarId>>],
) -> Result<(&'a CombinatorNode, &'a [VarId])> {
    match (node.subtrees(), children) {
        ([subtree], [child]) => Ok((subtree, child.value())),
        _ => Err(QueryError::InvalidTree(format!(
            "{} must have exactly one child",
            node
        ))),
    }
}

/// Round every node's variables to 0/1 and rebuild indicator tables.
fn decode(
    node: &CombinatorNode,
    vars: &AssignmentTree<Vec<VarId>>,
    solution: &LpSolution,
) -> Result<AssignmentTree<DenseTensor>> {
    let values: Vec<usize> = vars
        .value()
        .iter()
        .map(|&var| {
            if solution.value(var).round() >= 1.0 {
                TRUE_INDEX
            } else {
                FALSE_INDEX
            }
        })
        .collect();
    let value = node.local_weights().indicator_from_values(&values)?;

    let children = node
        .subtrees()
        .iter()
        .zip(vars.children())
        .map(|(subtree, child_vars)| decode(subtree, child_vars, solution))
        .collect::<Result<Vec<_>>>()?;
    Ok(AssignmentTree::new(value, children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjunction::and_truth_table;
    use groundquery_tensor::{DiscreteVariable, VariableSet, WeightedRelationTable};

    fn unary(name: &str, value_var: usize, weights: &[(f64, f64)]) -> CombinatorNode {
        let entities = DiscreteVariable::entity("entity", &["x", "y"][..weights.len()]);
        let table = WeightedRelationTable::from_boolean_weights(
            VariableSet::singleton(0, entities),
            value_var,
            weights,
        )
        .unwrap();
        CombinatorNode::predicate(name, table, false).unwrap()
    }

    #[test]
    fn test_program_shape() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let round = unary("round", 3, &[(0.0, 1.0), (0.5, 0.0)]);
        let tt = and_truth_table().unwrap();
        let and = CombinatorNode::create_conjunction(&tt, red, round, 0).unwrap();
        let (program, vars) = IlpInference::new().build_program(&and).unwrap();

        assert_eq!(program.num_variables(), 6);
        assert_eq!(program.num_integer_variables(), 6);
        // one range constraint (two rows) per entity
        assert_eq!(program.num_constraints(), 4);
        assert_eq!(vars.size(), 3);
        assert_eq!(program.objective_coefficient(vars.child_values()[0][0]), 2.0);
        assert_eq!(program.objective_coefficient(vars.child_values()[0][1]), -1.0);
    }

    #[test]
    fn test_decoded_outcomes_use_boolean_indices() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let pool = EnginePool::new(1);
        let decoded = red.ilp_inference(&pool, false, true).unwrap();
        assert_eq!(
            decoded.value().nonzero_keys(),
            vec![vec![0, TRUE_INDEX], vec![1, FALSE_INDEX]]
        );
    }

    #[test]
    fn test_lp_relaxation_uses_continuous_variables() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let (program, _) = IlpInference::new()
            .with_lp_relaxation(true)
            .build_program(&red)
            .unwrap();
        assert_eq!(program.num_integer_variables(), 0);
    }

    #[test]
    fn test_infinite_weights_fix_variables() {
        let red = unary("red", 2, &[(f64::NEG_INFINITY, 0.0), (0.0, f64::NEG_INFINITY)]);
        let (program, vars) = IlpInference::new().build_program(&red).unwrap();
        assert_eq!(program.num_constraints(), 2);
        assert_eq!(program.objective_coefficient(vars.value()[0]), 0.0);

        let pool = EnginePool::new(1);
        let decoded = red.ilp_inference(&pool, false, true).unwrap();
        assert_eq!(decoded.value().nonzero_keys(), vec![vec![0, 1], vec![1, 0]]);
    }

    #[test]
    fn test_forbidden_outcomes_on_both_sides_are_rejected() {
        let red = unary("red", 2, &[(f64::NEG_INFINITY, f64::NEG_INFINITY)]);
        assert!(matches!(
            IlpInference::new().build_program(&red),
            Err(QueryError::NumericInvariantViolation(_))
        ));
    }

    #[test]
    fn test_conflicting_determiner_is_infeasible() {
        // `the` needs exactly one true child, but both groundings are forced true.
        let red = unary("red", 2, &[(f64::NEG_INFINITY, 0.0), (f64::NEG_INFINITY, 0.0)]);
        let the = CombinatorNode::determiner(red, true).unwrap();
        let pool = EnginePool::new(1);
        assert!(matches!(
            the.ilp_inference(&pool, false, true),
            Err(QueryError::InfeasibleQuery(_))
        ));
        assert_eq!(pool.available(), 1);
    }
}
