//! The combinator tree: predicates at the leaves, logical combinators above.
//!
//! Every node owns a local weight table over its own output. Local decoding
//! and the subgradient exchange read and write those tables; ILP inference
//! only reads them.

use std::collections::BTreeSet;
use std::fmt;

use groundquery_lp::EnginePool;
use groundquery_tensor::{DenseTensor, Relabeling, VarNum, WeightedRelationTable};

use crate::assignment::AssignmentTree;
use crate::config::{InferenceConfig, InferenceStrategy};
use crate::conjunction::ConjunctionFactor;
use crate::dual_decomposition::{DualDecompositionReport, DualDecompositionSolver};
use crate::error::{QueryError, Result};
use crate::existential::ExistentialFactor;
use crate::ilp::IlpInference;

/// Tolerance used when checking a hard predicate against its best assignment.
const HARD_CONSTRAINT_TOLERANCE: f64 = 1e-4;

/// Name of the relation a predicate leaf grounds.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relation(String);

impl Relation {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Relation {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node computes from its children.
#[derive(Clone, Debug, PartialEq)]
pub enum Combinator {
    /// Leaf holding grounded relation weights.
    Predicate,
    /// AND of the children through a truth table.
    Conjunction(ConjunctionFactor),
    /// Existential projection of the single child.
    Existential(ExistentialFactor),
    /// `the` (`force_child_unique`) or `a`: exactly one output is selected.
    Determiner { force_child_unique: bool },
}

/// A node of a query tree.
///
/// `Clone` is a deep copy, including the dual decomposition multipliers held
/// by the factors, so a clone can be reparameterized independently.
#[derive(Clone, Debug, PartialEq)]
pub struct CombinatorNode {
    local_weights: WeightedRelationTable,
    subtrees: Vec<CombinatorNode>,
    relation: Option<Relation>,
    hard_constraint: bool,
    kind: Combinator,
}

fn check_boolean_output(weights: &WeightedRelationTable, what: &str) -> Result<()> {
    let value = weights.value_num().map_err(|_| {
        QueryError::InvalidTree(format!("{} must have exactly one value variable", what))
    })?;
    match weights.value_vars().get(value) {
        Some(var) if var.is_boolean() => Ok(()),
        var => Err(QueryError::InvalidTree(format!(
            "{} value variable {} must be boolean (F, T), has outcomes {:?}",
            what,
            value,
            var.map(|v| v.outcomes())
        ))),
    }
}

impl CombinatorNode {
    /// A leaf over the groundings of `relation`.
    pub fn predicate(
        relation: impl Into<Relation>,
        weights: WeightedRelationTable,
        hard_constraint: bool,
    ) -> Result<Self> {
        check_boolean_output(&weights, "predicate")?;
        Ok(Self {
            local_weights: weights,
            subtrees: Vec::new(),
            relation: Some(relation.into()),
            hard_constraint,
            kind: Combinator::Predicate,
        })
    }

    /// A conjunction whose `i`-th child is relabeled onto truth-table
    /// variable `i` by `child_relabelings[i]`.
    pub fn conjunction(
        truth_table: &WeightedRelationTable,
        local_weights: WeightedRelationTable,
        subtrees: Vec<CombinatorNode>,
        child_relabelings: Vec<Relabeling>,
    ) -> Result<Self> {
        check_boolean_output(&local_weights, "conjunction output")?;
        let factor =
            ConjunctionFactor::new(truth_table, &local_weights, &subtrees, child_relabelings)?;
        Ok(Self {
            local_weights,
            subtrees,
            relation: None,
            hard_constraint: true,
            kind: Combinator::Conjunction(factor),
        })
    }

    /// Conjoin `main` with `input`, whose single index variable is bound to
    /// `input_var` of `main`. The output ranges over `main`'s index variables.
    pub fn create_conjunction(
        truth_table: &WeightedRelationTable,
        main: CombinatorNode,
        input: CombinatorNode,
        input_var: VarNum,
    ) -> Result<Self> {
        let output_weights = main.local_weights.empty_copy()?;
        let tt_vars = truth_table.all_vars();
        let tt_nums = tt_vars.nums();
        if tt_nums.len() != 3 {
            return Err(QueryError::InvalidTree(format!(
                "a two-input conjunction needs a 3-variable truth table, got {}",
                tt_nums.len()
            )));
        }

        let main_relabeling = Relabeling::identity(output_weights.index_vars()).union(
            &Relabeling::from_variables(
                output_weights.value_vars(),
                &tt_vars.intersection(&tt_nums[..1]),
            )?,
        );
        let input_relabeling = Relabeling::from_variables(
            input.local_weights.index_vars(),
            &output_weights.all_vars().intersection(&[input_var]),
        )?
        .union(&Relabeling::from_variables(
            input.local_weights.value_vars(),
            &tt_vars.intersection(&tt_nums[1..2]),
        )?);

        Self::conjunction(
            truth_table,
            output_weights,
            vec![main, input],
            vec![main_relabeling, input_relabeling],
        )
    }

    /// An existential over `subtree`, whose output is described by
    /// `output_weights`. The variables in the subtree but not in the output
    /// are eliminated.
    pub fn existential(
        output_weights: WeightedRelationTable,
        subtree: CombinatorNode,
    ) -> Result<Self> {
        check_boolean_output(&output_weights, "existential output")?;
        let factor = ExistentialFactor::new(&output_weights, &subtree.local_weights)?;
        Ok(Self {
            local_weights: output_weights,
            subtrees: vec![subtree],
            relation: None,
            hard_constraint: true,
            kind: Combinator::Existential(factor),
        })
    }

    /// Existentially quantify `vars` out of `subtree`, starting from zero
    /// output weights.
    pub fn eliminate_variables(subtree: CombinatorNode, vars: &[VarNum]) -> Result<Self> {
        let output_weights = WeightedRelationTable::from_variables(
            subtree.local_weights.index_vars().remove_all(vars),
            subtree.local_weights.value_vars().remove_all(vars),
            0.0,
        )?;
        Self::existential(output_weights, subtree)
    }

    /// `the` (`force_child_unique`) or `a` over `subtree`. The determiner's
    /// own weights start as a copy of the child's.
    pub fn determiner(subtree: CombinatorNode, force_child_unique: bool) -> Result<Self> {
        check_boolean_output(&subtree.local_weights, "determiner child")?;
        Ok(Self {
            local_weights: subtree.local_weights.clone(),
            subtrees: vec![subtree],
            relation: None,
            hard_constraint: true,
            kind: Combinator::Determiner { force_child_unique },
        })
    }

    pub fn local_weights(&self) -> &WeightedRelationTable {
        &self.local_weights
    }

    pub(crate) fn update_local_weights(
        &mut self,
        gradient: &DenseTensor,
        multiplier: f64,
    ) -> Result<()> {
        self.local_weights.add_scaled_assign(gradient, multiplier)?;
        Ok(())
    }

    pub fn kind(&self) -> &Combinator {
        &self.kind
    }

    pub fn has_predicate(&self) -> bool {
        self.relation.is_some()
    }

    /// The relation this node grounds, if it is a predicate leaf.
    pub fn relation(&self) -> Option<&Relation> {
        self.relation.as_ref()
    }

    /// Every relation grounded anywhere in the tree.
    pub fn all_predicates(&self) -> BTreeSet<Relation> {
        let mut relations = BTreeSet::new();
        self.collect_predicates(&mut relations);
        relations
    }

    fn collect_predicates(&self, relations: &mut BTreeSet<Relation>) {
        if let Some(relation) = &self.relation {
            relations.insert(relation.clone());
        }
        for subtree in &self.subtrees {
            subtree.collect_predicates(relations);
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.subtrees.is_empty()
    }

    pub fn subtrees(&self) -> &[CombinatorNode] {
        &self.subtrees
    }

    pub(crate) fn subtrees_mut(&mut self) -> &mut [CombinatorNode] {
        &mut self.subtrees
    }

    pub fn is_hard_constraint(&self) -> bool {
        self.hard_constraint
    }

    /// Best assignment of every node's own local weights, ignoring the
    /// constraints between nodes.
    pub fn locally_decode_variables(&self) -> Result<AssignmentTree<DenseTensor>> {
        let children = self
            .subtrees
            .iter()
            .map(CombinatorNode::locally_decode_variables)
            .collect::<Result<Vec<_>>>()?;
        Ok(AssignmentTree::new(self.local_weights.best_assignment()?, children))
    }

    /// Best assignment of every node's factor under its current multipliers.
    /// Leaves have no factor and decode to an empty list.
    pub fn locally_decode_factors(&self) -> Result<AssignmentTree<Vec<DenseTensor>>> {
        let children = self
            .subtrees
            .iter()
            .map(CombinatorNode::locally_decode_factors)
            .collect::<Result<Vec<_>>>()?;
        let value = match &self.kind {
            Combinator::Predicate => Vec::new(),
            Combinator::Conjunction(factor) => factor.decode()?,
            Combinator::Existential(factor) => factor.decode()?,
            Combinator::Determiner { .. } => {
                return Err(QueryError::UnsupportedOperation(format!(
                    "local factor decoding of determiner {}",
                    self
                )))
            }
        };
        Ok(AssignmentTree::new(value, children))
    }

    /// One subgradient step over the whole tree. Returns the total number of
    /// disagreements between local and factor decodings.
    pub(crate) fn subgradient_update(
        &mut self,
        local: &AssignmentTree<DenseTensor>,
        factors: &AssignmentTree<Vec<DenseTensor>>,
        step_size: f64,
    ) -> Result<usize> {
        if let Combinator::Determiner { .. } = self.kind {
            return Err(QueryError::UnsupportedOperation(format!(
                "dual decomposition update of determiner {}",
                self
            )));
        }

        let CombinatorNode {
            local_weights,
            subtrees,
            kind,
            ..
        } = self;

        let mut disagreements = 0;
        for (i, subtree) in subtrees.iter_mut().enumerate() {
            let (child_local, child_factors) = match (local.child(i), factors.child(i)) {
                (Some(l), Some(f)) => (l, f),
                _ => {
                    return Err(QueryError::InvalidTree(format!(
                        "assignment tree is missing child {}",
                        i
                    )))
                }
            };
            disagreements += subtree.subgradient_update(child_local, child_factors, step_size)?;
        }

        disagreements += match kind {
            Combinator::Predicate => 0,
            Combinator::Conjunction(factor) => factor.subgradient_update(
                local_weights,
                subtrees,
                local.value(),
                &local.child_values(),
                factors.value(),
                step_size,
            )?,
            Combinator::Existential(factor) => {
                let (child, child_assignment) = match (subtrees.first_mut(), local.child(0)) {
                    (Some(child), Some(assignment)) => (child, assignment.value()),
                    _ => {
                        return Err(QueryError::InvalidTree(
                            "existential has no child".to_string(),
                        ))
                    }
                };
                factor.subgradient_update(
                    local_weights,
                    &mut child.local_weights,
                    local.value(),
                    child_assignment,
                    factors.value(),
                    step_size,
                )?
            }
            // rejected before the children are touched
            Combinator::Determiner { .. } => 0,
        };
        Ok(disagreements)
    }

    /// Run dual decomposition on this tree in place.
    pub fn dual_decomposition(&mut self, max_iterations: usize) -> Result<DualDecompositionReport> {
        DualDecompositionSolver::new(max_iterations).run(self)
    }

    /// Reparameterize a copy of this tree; the original is untouched. Read
    /// the result off with [`CombinatorNode::locally_decode_variables`].
    pub fn reparameterize_dual_decomposition(
        &self,
        max_iterations: usize,
    ) -> Result<CombinatorNode> {
        let mut copy = self.clone();
        copy.dual_decomposition(max_iterations)?;
        Ok(copy)
    }

    /// Exact (or LP-relaxed) MAP inference with one solve over the whole tree.
    pub fn ilp_inference(
        &self,
        pool: &EnginePool,
        use_lp_relaxation: bool,
        apply_weak_supervision_constraints: bool,
    ) -> Result<AssignmentTree<DenseTensor>> {
        IlpInference::new()
            .with_lp_relaxation(use_lp_relaxation)
            .with_weak_supervision_constraints(apply_weak_supervision_constraints)
            .solve(self, pool)
    }

    /// Decode the tree with the strategy selected in `config`.
    pub fn infer(
        &self,
        config: &InferenceConfig,
        pool: &EnginePool,
    ) -> Result<AssignmentTree<DenseTensor>> {
        match config.strategy {
            InferenceStrategy::Ilp => IlpInference::from_config(config).solve(self, pool),
            InferenceStrategy::DualDecomposition => self
                .reparameterize_dual_decomposition(config.dual_decomposition.max_iterations)?
                .locally_decode_variables(),
        }
    }

    /// Score of a full assignment: the sum over nodes of each node's local
    /// weight at its assignment. A hard predicate instead contributes `0`
    /// when its assignment is as good as its best one and `-inf` otherwise.
    pub fn score_of(&self, assignment: &AssignmentTree<DenseTensor>) -> Result<f64> {
        if assignment.children().len() != self.subtrees.len() {
            return Err(QueryError::InvalidTree(format!(
                "assignment has {} children, node has {}",
                assignment.children().len(),
                self.subtrees.len()
            )));
        }
        let mut score = 0.0;
        for (subtree, child) in self.subtrees.iter().zip(assignment.children()) {
            score += subtree.score_of(child)?;
        }

        let weight = self.local_weights.assignment_weight(assignment.value())?;
        score += match self.kind {
            Combinator::Predicate if self.hard_constraint => {
                let best = self
                    .local_weights
                    .assignment_weight(&self.local_weights.best_assignment()?)?;
                if weight == best || (weight - best).abs() < HARD_CONSTRAINT_TOLERANCE {
                    0.0
                } else {
                    f64::NEG_INFINITY
                }
            }
            _ => weight,
        };

        if score.is_nan() {
            return Err(QueryError::NumericInvariantViolation(format!(
                "score of {} is NaN",
                self
            )));
        }
        Ok(score)
    }

    /// Deterministic bottom-up evaluation of the query on the predicates'
    /// best assignments.
    pub fn evaluate_query_map(&self) -> Result<AssignmentTree<DenseTensor>> {
        let children = self
            .subtrees
            .iter()
            .map(CombinatorNode::evaluate_query_map)
            .collect::<Result<Vec<_>>>()?;
        let value = match &self.kind {
            Combinator::Predicate => self.local_weights.best_assignment()?,
            Combinator::Conjunction(factor) => {
                let outputs: Vec<&DenseTensor> = children.iter().map(|c| c.value()).collect();
                factor.evaluate(&self.local_weights, &outputs)?
            }
            Combinator::Existential(factor) => {
                let child = children.first().ok_or_else(|| {
                    QueryError::InvalidTree("existential has no child".to_string())
                })?;
                factor.evaluate(&self.local_weights, child.value())?
            }
            Combinator::Determiner { .. } => {
                return Err(QueryError::UnsupportedOperation(
                    "determiners can only be decoded with an ILP".to_string(),
                ))
            }
        };
        Ok(AssignmentTree::new(value, children))
    }

    /// One line per predicate leaf listing its true groundings.
    pub fn assignment_string(&self, assignment: &AssignmentTree<DenseTensor>) -> Result<String> {
        if self.is_leaf() {
            let relation = self
                .relation
                .as_ref()
                .map(Relation::name)
                .unwrap_or("<anonymous>");
            return Ok(format!(
                "{}: {}",
                relation,
                self.local_weights.assignment_string(assignment.value())?
            ));
        }
        let mut lines = Vec::with_capacity(self.subtrees.len());
        for (i, subtree) in self.subtrees.iter().enumerate() {
            let child = assignment.child(i).ok_or_else(|| {
                QueryError::InvalidTree(format!("assignment tree is missing child {}", i))
            })?;
            lines.push(subtree.assignment_string(child)?);
        }
        Ok(lines.join("\n"))
    }
}

impl fmt::Display for CombinatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.kind {
            Combinator::Predicate => {
                return match &self.relation {
                    Some(relation) => write!(f, "{}", relation),
                    None => f.write_str("<anonymous>"),
                }
            }
            Combinator::Conjunction(_) => "and",
            Combinator::Existential(_) => "exists",
            Combinator::Determiner {
                force_child_unique: true,
            } => "the",
            Combinator::Determiner {
                force_child_unique: false,
            } => "a",
        };
        write!(f, "{}(", name)?;
        for (i, subtree) in self.subtrees.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", subtree)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conjunction::and_truth_table;
    use approx::assert_abs_diff_eq;
    use groundquery_tensor::{DiscreteVariable, VariableSet};

    fn unary(name: &str, value_var: VarNum, weights: &[(f64, f64)]) -> CombinatorNode {
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
    fn test_predicate_queries() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        assert!(red.is_leaf());
        assert!(red.has_predicate());
        assert_eq!(red.relation(), Some(&Relation::new("red")));
        assert!(!red.is_hard_constraint());
        assert_eq!(red.to_string(), "red");
    }

    #[test]
    fn test_tree_queries_and_display() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let round = unary("round", 3, &[(0.0, 1.0), (0.0, 1.0)]);
        let tt = and_truth_table().unwrap();
        let and = CombinatorNode::create_conjunction(&tt, red, round, 0).unwrap();
        let the = CombinatorNode::determiner(and, true).unwrap();

        assert_eq!(the.to_string(), "the(and(red, round))");
        let names: Vec<String> = the
            .all_predicates()
            .into_iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["red", "round"]);
        assert_eq!(the.subtrees().len(), 1);
        assert!(!the.has_predicate());
        assert!(the.is_hard_constraint());
    }

    #[test]
    fn test_predicate_rejects_non_boolean_value() {
        let index = VariableSet::singleton(0, DiscreteVariable::entity("entity", &["x"]));
        let value = VariableSet::singleton(2, DiscreteVariable::entity("colour", &["r", "g", "b"]));
        let table = WeightedRelationTable::from_variables(index, value, 0.0).unwrap();
        assert!(matches!(
            CombinatorNode::predicate("colour", table, false),
            Err(QueryError::InvalidTree(_))
        ));
    }

    #[test]
    fn test_predicate_rejects_two_valued_entity_value() {
        let index = VariableSet::singleton(0, DiscreteVariable::entity("entity", &["x"]));
        let value = VariableSet::singleton(2, DiscreteVariable::entity("side", &["left", "right"]));
        let table = WeightedRelationTable::from_variables(index, value, 0.0).unwrap();
        assert!(matches!(
            CombinatorNode::predicate("side", table, false),
            Err(QueryError::InvalidTree(_))
        ));
    }

    #[test]
    fn test_score_of_local_decoding() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let decoded = red.locally_decode_variables().unwrap();
        assert_abs_diff_eq!(red.score_of(&decoded).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hard_predicate_scores() {
        let entities = DiscreteVariable::entity("entity", &["x", "y"]);
        let table = WeightedRelationTable::from_boolean_weights(
            VariableSet::singleton(0, entities),
            2,
            &[(0.0, 2.0), (1.0, 0.0)],
        )
        .unwrap();
        let hard = CombinatorNode::predicate("red", table.clone(), true).unwrap();
        let best = hard.locally_decode_variables().unwrap();
        assert_eq!(hard.score_of(&best).unwrap(), 0.0);

        let flipped = table.indicator_from_values(&[0, 0]).unwrap();
        assert_eq!(
            hard.score_of(&AssignmentTree::leaf(flipped)).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_determiner_has_no_local_factor() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let a = CombinatorNode::determiner(red, false).unwrap();
        assert!(a.locally_decode_variables().is_ok());
        assert!(matches!(
            a.locally_decode_factors(),
            Err(QueryError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            a.evaluate_query_map(),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_evaluate_query_map_conjunction() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let round = unary("round", 3, &[(0.0, 1.0), (0.0, 1.0)]);
        let tt = and_truth_table().unwrap();
        let and = CombinatorNode::create_conjunction(&tt, red, round, 0).unwrap();
        let result = and.evaluate_query_map().unwrap();
        // red = [T, F], round = [T, T]
        assert_eq!(result.value().nonzero_keys(), vec![vec![0, 1], vec![1, 0]]);
    }

    #[test]
    fn test_evaluate_query_map_existential() {
        let entities = DiscreteVariable::entity("entity", &["x", "y"]);
        let index = VariableSet::empty()
            .with(0, entities.clone())
            .with(1, entities);
        let value = VariableSet::singleton(2, DiscreteVariable::boolean("truth"));
        let mut table = WeightedRelationTable::from_variables(index, value, 0.0).unwrap();
        // left_of(y, x) is the only true grounding.
        let mut grounding =
            DenseTensor::zeros(table.tensor().dims().to_vec(), table.tensor().sizes().to_vec())
                .unwrap();
        grounding.set(&[1, 0, 1], 1.0).unwrap();
        table.add_assign(&grounding).unwrap();
        let left_of = CombinatorNode::predicate("left_of", table, false).unwrap();

        let exists = CombinatorNode::eliminate_variables(left_of, &[1]).unwrap();
        assert_eq!(exists.to_string(), "exists(left_of)");
        let result = exists.evaluate_query_map().unwrap();
        assert_eq!(result.value().dims(), &[0, 2]);
        assert_eq!(result.value().nonzero_keys(), vec![vec![0, 0], vec![1, 1]]);
    }

    #[test]
    fn test_assignment_string_lists_true_groundings() {
        let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
        let round = unary("round", 3, &[(0.0, 1.0), (0.0, 1.0)]);
        let tt = and_truth_table().unwrap();
        let and = CombinatorNode::create_conjunction(&tt, red, round, 0).unwrap();
        let decoded = and.locally_decode_variables().unwrap();
        let text = and.assignment_string(&decoded).unwrap();
        assert_eq!(text, "red: {[x] }\nround: {[x] [y] }");
    }

    #[test]
    fn test_reparameterize_leaves_original_untouched() {
        let red = unary("red", 2, &[(0.0, 2.0)]);
        let round = unary("round", 3, &[(0.0, 3.0)]);
        let tt = and_truth_table().unwrap();
        let and = CombinatorNode::create_conjunction(&tt, red, round, 0).unwrap();
        let before = and.clone();
        let copy = and.reparameterize_dual_decomposition(100).unwrap();
        assert_eq!(and, before);
        assert_ne!(copy, before);
    }
}
