//! Conjunction factors: a boolean truth table tying the children's outputs
//! to the node's own output.
//!
//! The constraint factor lives over the node's index variables plus the
//! truth-table variables. Each child's output is relabeled onto one input
//! slot of the table (input `i` is the `i`-th truth-table variable) and the
//! node's own output onto the last slot.

use groundquery_lp::{LinearExpr, LinearProgram, VarId};
use groundquery_tensor::{
    DenseTensor, DiscreteVariable, Relabeling, VarNum, VariableSet, WeightedRelationTable,
};

use crate::error::{QueryError, Result};
use crate::node::CombinatorNode;

/// Variable numbers of the standard AND truth table.
pub const AND_INPUT1_VAR: VarNum = 100;
pub const AND_INPUT2_VAR: VarNum = 101;
pub const AND_OUTPUT_VAR: VarNum = 102;

/// The 2-input AND gate as a 0/1 table over (input1, input2, output).
pub fn and_truth_table() -> Result<WeightedRelationTable> {
    let vars = VariableSet::empty()
        .with(AND_INPUT1_VAR, DiscreteVariable::boolean("and-input1"))
        .with(AND_INPUT2_VAR, DiscreteVariable::boolean("and-input2"))
        .with(AND_OUTPUT_VAR, DiscreteVariable::boolean("and-output"));
    let tensor = DenseTensor::from_fn(vars.nums(), vars.sizes(), |key| {
        if key[0] & key[1] == key[2] {
            1.0
        } else {
            0.0
        }
    })?;
    Ok(WeightedRelationTable::new(tensor, VariableSet::empty(), vars)?)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConjunctionFactor {
    truth_table_vars: VariableSet,
    constraint_factor: WeightedRelationTable,
    child_relabelings: Vec<Relabeling>,
    output_relabeling: Relabeling,
}

impl ConjunctionFactor {
    pub(crate) fn new(
        truth_table: &WeightedRelationTable,
        output_weights: &WeightedRelationTable,
        subtrees: &[CombinatorNode],
        child_relabelings: Vec<Relabeling>,
    ) -> Result<Self> {
        let truth_table_vars = truth_table.all_vars();
        if truth_table_vars.len() != subtrees.len() + 1 {
            return Err(QueryError::InvalidTree(format!(
                "truth table has {} variables but the conjunction has {} children",
                truth_table_vars.len(),
                subtrees.len()
            )));
        }
        if child_relabelings.len() != subtrees.len() {
            return Err(QueryError::InvalidTree(format!(
                "{} relabelings for {} children",
                child_relabelings.len(),
                subtrees.len()
            )));
        }

        let index_vars = output_weights.index_vars();
        let outcomes = DenseTensor::constant(index_vars.nums(), index_vars.sizes(), 1.0)?;
        let tensor = outcomes.outer_product(&truth_table.tensor().ln())?;
        let constraint_factor =
            WeightedRelationTable::new(tensor, index_vars.clone(), truth_table_vars.clone())?;

        let tt_nums = truth_table_vars.nums();
        let output_slot = truth_table_vars.intersection(&tt_nums[subtrees.len()..]);
        let output_relabeling = Relabeling::identity(index_vars).union(&Relabeling::from_variables(
            output_weights.value_vars(),
            &output_slot,
        )?);

        let factor_vars = constraint_factor.all_vars();
        for (i, (subtree, relabeling)) in subtrees.iter().zip(&child_relabelings).enumerate() {
            let mapped = relabeling.apply(&subtree.local_weights().all_vars())?;
            let mapped_value = relabeling.apply_num(subtree.local_weights().value_num()?);
            if mapped_value != tt_nums[i] || mapped.iter().any(|(n, _)| !factor_vars.contains(n)) {
                return Err(QueryError::InvalidTree(format!(
                    "child {} relabeling {} does not map onto the conjunction factor",
                    i, relabeling
                )));
            }
        }

        Ok(Self {
            truth_table_vars,
            constraint_factor,
            child_relabelings,
            output_relabeling,
        })
    }

    pub fn constraint_factor(&self) -> &WeightedRelationTable {
        &self.constraint_factor
    }

    pub fn child_relabelings(&self) -> &[Relabeling] {
        &self.child_relabelings
    }

    pub fn output_relabeling(&self) -> &Relabeling {
        &self.output_relabeling
    }

    /// The factor's preferred joint outcome for every index assignment.
    pub(crate) fn decode(&self) -> Result<Vec<DenseTensor>> {
        let value_nums = self.constraint_factor.value_vars().nums();
        Ok(vec![self.constraint_factor.argmax(&value_nums)?.indicator])
    }

    /// Disagreement counts per index assignment and slot `slot` of the table.
    fn factor_gradient(
        disagreements: &DenseTensor,
        index_nums: &[VarNum],
        slot: VarNum,
    ) -> Result<DenseTensor> {
        let others: Vec<VarNum> = disagreements
            .dims()
            .iter()
            .copied()
            .filter(|d| !index_nums.contains(d) && *d != slot)
            .collect();
        Ok(disagreements.sum_out(&others)?)
    }

    /// The locally decoded outcome of `slot`, weighted by how often its
    /// index assignment took part in a disagreement.
    fn local_gradient(
        disagreements: &DenseTensor,
        index_nums: &[VarNum],
        local_assignment: &DenseTensor,
        slot: VarNum,
        slot_size: usize,
    ) -> Result<DenseTensor> {
        let others: Vec<VarNum> = disagreements
            .dims()
            .iter()
            .copied()
            .filter(|d| !index_nums.contains(d))
            .collect();
        let counts = disagreements.sum_out(&others)?;
        let possibilities = DenseTensor::constant(vec![slot], vec![slot_size], 1.0)?;
        Ok(counts
            .outer_product(&possibilities)?
            .elementwise_product(local_assignment)?)
    }

    fn slot_size(&self, slot: VarNum) -> Result<usize> {
        self.truth_table_vars
            .get(slot)
            .map(DiscreteVariable::size)
            .ok_or_else(|| {
                QueryError::InvalidTree(format!("{} is not a truth-table variable", slot))
            })
    }

    /// One subgradient step. Returns the number of factor outcomes some
    /// local node disagrees with.
    pub(crate) fn subgradient_update(
        &mut self,
        output_weights: &mut WeightedRelationTable,
        subtrees: &mut [CombinatorNode],
        root_assignment: &DenseTensor,
        child_assignments: &[&DenseTensor],
        factor_assignments: &[DenseTensor],
        step_size: f64,
    ) -> Result<usize> {
        let factor_assignment = factor_assignments.first().ok_or_else(|| {
            QueryError::InvalidTree("conjunction factor assignment is missing".to_string())
        })?;
        if child_assignments.len() != subtrees.len() {
            return Err(QueryError::InvalidTree(format!(
                "{} child assignments for {} children",
                child_assignments.len(),
                subtrees.len()
            )));
        }

        let root = root_assignment.relabel(&self.output_relabeling)?;
        let children = child_assignments
            .iter()
            .zip(&self.child_relabelings)
            .map(|(assignment, relabeling)| assignment.relabel(relabeling))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut intersection = factor_assignment.elementwise_product(&root)?;
        for child in &children {
            intersection = intersection.elementwise_product(child)?;
        }
        let disagreements = factor_assignment.elementwise_sub(&intersection)?;
        let count = disagreements.sum_all().round().max(0.0) as usize;

        let index_nums = output_weights.index_vars().nums();
        let output_slot = self.output_relabeling.apply_num(output_weights.value_num()?);
        let output_factor_gradient =
            Self::factor_gradient(&disagreements, &index_nums, output_slot)?;
        let output_local_gradient = Self::local_gradient(
            &disagreements,
            &index_nums,
            &root,
            output_slot,
            self.slot_size(output_slot)?,
        )?;

        let mut child_factor_gradients = Vec::with_capacity(subtrees.len());
        let mut child_local_gradients = Vec::with_capacity(subtrees.len());
        for ((subtree, relabeling), child) in
            subtrees.iter().zip(&self.child_relabelings).zip(&children)
        {
            let slot = relabeling.apply_num(subtree.local_weights().value_num()?);
            child_factor_gradients.push(Self::factor_gradient(&disagreements, &index_nums, slot)?);
            child_local_gradients.push(Self::local_gradient(
                &disagreements,
                &index_nums,
                child,
                slot,
                self.slot_size(slot)?,
            )?);
        }

        let inverse_output = self.output_relabeling.inverse()?;
        output_weights
            .add_scaled_assign(&output_local_gradient.relabel(&inverse_output)?, -step_size)?;
        output_weights
            .add_scaled_assign(&output_factor_gradient.relabel(&inverse_output)?, step_size)?;

        for (i, subtree) in subtrees.iter_mut().enumerate() {
            let relabeling = &self.child_relabelings[i];
            let child_vars = relabeling.apply(&subtree.local_weights().all_vars())?;
            let not_in_child: Vec<VarNum> = child_local_gradients[i]
                .dims()
                .iter()
                .copied()
                .filter(|d| !child_vars.contains(*d))
                .collect();
            let inverse = relabeling.inverse()?;
            let local = child_local_gradients[i]
                .sum_out(&not_in_child)?
                .relabel(&inverse)?;
            let factor = child_factor_gradients[i]
                .sum_out(&not_in_child)?
                .relabel(&inverse)?;
            subtree.update_local_weights(&local, -step_size)?;
            subtree.update_local_weights(&factor, step_size)?;
        }

        self.constraint_factor
            .add_scaled_assign(&output_local_gradient, step_size)?;
        self.constraint_factor
            .add_scaled_assign(&output_factor_gradient, -step_size)?;
        for (local, factor) in child_local_gradients.iter().zip(&child_factor_gradients) {
            self.constraint_factor.add_scaled_assign(local, step_size)?;
            self.constraint_factor.add_scaled_assign(factor, -step_size)?;
        }

        Ok(count)
    }

    /// `0 <= sum(children) - k * output <= k - 1` per index assignment, which
    /// makes the output the AND of the `k` children under integrality.
    pub(crate) fn add_ilp_constraints(
        &self,
        output_weights: &WeightedRelationTable,
        subtrees: &[CombinatorNode],
        output_vars: &[VarId],
        child_vars: &[&Vec<VarId>],
        program: &mut LinearProgram,
    ) -> Result<()> {
        let inverses = self
            .child_relabelings
            .iter()
            .map(Relabeling::inverse)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let arity = subtrees.len() as f64;

        for (i, &output_var) in output_vars.iter().enumerate() {
            let key = output_weights.ilp_index_to_assignment(i)?;
            let mut expr = LinearExpr::new().term(output_var, -arity);
            for ((subtree, inverse), vars) in subtrees.iter().zip(&inverses).zip(child_vars) {
                let child_key = key.map_variables(inverse);
                let index = subtree.local_weights().ilp_variable_index(&child_key)?;
                let var = vars.get(index).copied().ok_or_else(|| {
                    QueryError::InvalidTree(format!("child ILP variable {} is missing", index))
                })?;
                expr.add_term(var, 1.0);
            }
            program.add_range_constraint(expr, 0.0, arity - 1.0)?;
        }
        Ok(())
    }

    /// Combine the children's decoded outputs through the truth table.
    pub(crate) fn evaluate(
        &self,
        output_weights: &WeightedRelationTable,
        child_outputs: &[&DenseTensor],
    ) -> Result<DenseTensor> {
        let mut scores = self.constraint_factor.tensor().clone();
        for (output, relabeling) in child_outputs.iter().zip(&self.child_relabelings) {
            scores = scores.elementwise_add(&output.relabel(relabeling)?.ln())?;
        }
        let value_nums = self.constraint_factor.value_vars().nums();
        let indicator = scores.argmax_out(&value_nums)?.indicator;

        let kept = self.output_relabeling.apply(&output_weights.all_vars())?;
        let eliminate: Vec<VarNum> = indicator
            .dims()
            .iter()
            .copied()
            .filter(|d| !kept.contains(*d))
            .collect();
        Ok(indicator
            .max_out(&eliminate)?
            .relabel(&self.output_relabeling.inverse()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_truth_table() {
        let table = and_truth_table().unwrap();
        assert_eq!(
            table.value_vars().nums(),
            vec![AND_INPUT1_VAR, AND_INPUT2_VAR, AND_OUTPUT_VAR]
        );
        assert!(table.index_vars().is_empty());
        assert_eq!(
            table.tensor().nonzero_keys(),
            vec![vec![0, 0, 0], vec![0, 1, 0], vec![1, 0, 0], vec![1, 1, 1]]
        );
    }
}
