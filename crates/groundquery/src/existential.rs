//! Existential factors: `exists eliminated. child(eliminated, kept)`.
//!
//! The factor keeps two multiplier tables, one over the child's variables and
//! one over the node's own, instead of a joint truth table. The node's value
//! variable is the child's value variable.

use groundquery_lp::{Comparison, LinearExpr, LinearProgram, VarId};
use groundquery_tensor::{
    Assignment, DenseTensor, KeyIter, VarNum, VariableSet, WeightedRelationTable,
};

use crate::error::{QueryError, Result};

/// Below this many selected witnesses an index assignment counts as having none.
const WITNESS_EPS: f64 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub struct ExistentialFactor {
    child_factor_weights: WeightedRelationTable,
    output_factor_weights: WeightedRelationTable,
    dims_to_eliminate: Vec<VarNum>,
    value_dim: VarNum,
}

impl ExistentialFactor {
    pub(crate) fn new(
        output_weights: &WeightedRelationTable,
        child_weights: &WeightedRelationTable,
    ) -> Result<Self> {
        let value_dim = child_weights.value_num().map_err(|_| {
            QueryError::InvalidTree(
                "existential child must have exactly one value variable".to_string(),
            )
        })?;
        if output_weights.value_num()? != value_dim {
            return Err(QueryError::InvalidTree(format!(
                "existential output value variable must be the child's ({})",
                value_dim
            )));
        }
        let output_index = output_weights.index_vars().nums();
        if let Some(&extra) = output_index
            .iter()
            .find(|n| !child_weights.index_vars().contains(**n))
        {
            return Err(QueryError::InvalidTree(format!(
                "existential output variable {} is not an index variable of its child",
                extra
            )));
        }
        let dims_to_eliminate = child_weights.index_vars().remove_all(&output_index).nums();
        if dims_to_eliminate.is_empty() {
            return Err(QueryError::InvalidTree(
                "existential must eliminate at least one variable".to_string(),
            ));
        }

        Ok(Self {
            child_factor_weights: child_weights.empty_copy()?,
            output_factor_weights: output_weights.empty_copy()?,
            dims_to_eliminate,
            value_dim,
        })
    }

    pub fn dims_to_eliminate(&self) -> &[VarNum] {
        &self.dims_to_eliminate
    }

    pub fn value_dim(&self) -> VarNum {
        self.value_dim
    }

    pub fn child_factor_weights(&self) -> &WeightedRelationTable {
        &self.child_factor_weights
    }

    pub fn output_factor_weights(&self) -> &WeightedRelationTable {
        &self.output_factor_weights
    }

    /// Best joint outcome of the factor: `[output assignment, child assignment]`.
    ///
    /// For each kept index assignment the factor compares "output false, every
    /// witness false" against "output true, at least one witness true". When
    /// the unconstrained per-witness argmax selects no true witness, the
    /// witness whose switch to true costs least is forced on.
    pub(crate) fn decode(&self) -> Result<Vec<DenseTensor>> {
        let v = self.value_dim;
        let elim = &self.dims_to_eliminate;
        let child = self.child_factor_weights.tensor();
        let output = self.output_factor_weights.tensor();

        let zero_weights = child.slice(&[v], &[0])?;
        let combined_zero = zero_weights
            .sum_out(elim)?
            .elementwise_add(&output.slice(&[v], &[0])?)?;

        let best = child.argmax_out(&[v])?;
        let mut best_assignments = best.indicator.clone();
        let one_counts = best.indicator.slice(&[v], &[1])?.sum_out(elim)?;
        let mut child_one_weights = best.maxima.sum_out(elim)?;

        let deltas = child
            .slice(&[v], &[1])?
            .elementwise_sub(&zero_weights)?
            .argmax_out(elim)?;

        for key in one_counts.keys() {
            if one_counts.get(&key)? >= WITNESS_EPS {
                continue;
            }
            let index = one_counts.key_to_linear(&key)?;
            let delta = deltas.maxima.get(&key)?;
            child_one_weights.set(&key, child_one_weights.get(&key)? + delta)?;

            let witness = deltas.backpointer(index).ok_or_else(|| {
                QueryError::InvalidTree(format!("no witness recorded for index {}", index))
            })?;
            let mut witness_key = zero_weights.linear_to_key(witness)?;
            witness_key.push(0);
            best_assignments.set(&witness_key, 0.0)?;
            if let Some(last) = witness_key.last_mut() {
                *last = 1;
            }
            best_assignments.set(&witness_key, 1.0)?;
        }

        let combined_one = child_one_weights.elementwise_add(&output.slice(&[v], &[1])?)?;
        let one_indicator = DenseTensor::from_fn(
            combined_one.dims().to_vec(),
            combined_one.sizes().to_vec(),
            |key| {
                let one = combined_one.get(key).unwrap_or(f64::NEG_INFINITY);
                let zero = combined_zero.get(key).unwrap_or(f64::NEG_INFINITY);
                if one > zero {
                    1.0
                } else {
                    0.0
                }
            },
        )?;
        let zero_indicator = one_indicator.map(|x| 1.0 - x);

        let value_false = DenseTensor::from_vec(vec![v], vec![2], vec![1.0, 0.0])?;
        let value_true = DenseTensor::from_vec(vec![v], vec![2], vec![0.0, 1.0])?;

        let child_zeros = DenseTensor::constant(child.dims().to_vec(), child.sizes().to_vec(), 1.0)?
            .elementwise_product(&value_false)?;
        let child_value = best_assignments
            .elementwise_product(&one_indicator)?
            .elementwise_add(&child_zeros.elementwise_product(&zero_indicator)?)?;

        let root_ones =
            DenseTensor::constant(output.dims().to_vec(), output.sizes().to_vec(), 1.0)?;
        let root_value = root_ones
            .elementwise_product(&value_true)?
            .elementwise_product(&one_indicator)?
            .elementwise_add(
                &root_ones
                    .elementwise_product(&value_false)?
                    .elementwise_product(&zero_indicator)?,
            )?;

        Ok(vec![root_value, child_value])
    }

    /// One subgradient step against the root and child local tables. Returns
    /// the squared disagreement count.
    pub(crate) fn subgradient_update(
        &mut self,
        output_weights: &mut WeightedRelationTable,
        child_weights: &mut WeightedRelationTable,
        root_assignment: &DenseTensor,
        child_assignment: &DenseTensor,
        factor_assignments: &[DenseTensor],
        step_size: f64,
    ) -> Result<usize> {
        let (root_factor, child_factor) = match factor_assignments {
            [root, child] => (root, child),
            _ => {
                return Err(QueryError::InvalidTree(format!(
                    "existential expects 2 factor assignments, got {}",
                    factor_assignments.len()
                )))
            }
        };

        let root_disagreements = root_assignment.elementwise_sub(root_factor)?;
        self.output_factor_weights
            .add_scaled_assign(&root_disagreements, step_size)?;
        output_weights.add_scaled_assign(&root_disagreements, -step_size)?;
        let root_count = root_disagreements.map(|x| x * x).sum_all();

        let child_disagreements = child_assignment.elementwise_sub(child_factor)?;
        self.child_factor_weights
            .add_scaled_assign(&child_disagreements, step_size)?;
        child_weights.add_scaled_assign(&child_disagreements, -step_size)?;
        let child_count = child_disagreements.map(|x| x * x).sum_all();

        Ok((root_count + child_count).round().max(0.0) as usize)
    }

    /// `or >= child` for every witness and `sum(witnesses) >= or`, per kept
    /// index assignment.
    pub(crate) fn add_ilp_constraints(
        &self,
        output_weights: &WeightedRelationTable,
        child_weights: &WeightedRelationTable,
        output_vars: &[VarId],
        child_vars: &[VarId],
        program: &mut LinearProgram,
    ) -> Result<()> {
        let output_index = output_weights.index_vars();
        let witness_vars = child_weights
            .index_vars()
            .intersection(&self.dims_to_eliminate);

        for output_assignment in all_assignments(output_index)? {
            let or_var = lookup(
                output_vars,
                output_weights.ilp_variable_index(&output_assignment)?,
            )?;
            let mut upper = LinearExpr::new().term(or_var, 1.0);
            for witness in all_assignments(&witness_vars)? {
                let index = child_weights.ilp_variable_index(&witness.union(&output_assignment))?;
                let child_var = lookup(child_vars, index)?;
                program.add_constraint(
                    LinearExpr::new().term(or_var, 1.0).term(child_var, -1.0),
                    Comparison::GreaterEqual,
                    0.0,
                )?;
                upper.add_term(child_var, -1.0);
            }
            program.add_constraint(upper, Comparison::LessEqual, 0.0)?;
        }
        Ok(())
    }

    /// The output is true exactly where some witness of the child is true.
    pub(crate) fn evaluate(
        &self,
        output_weights: &WeightedRelationTable,
        child_output: &DenseTensor,
    ) -> Result<DenseTensor> {
        let any_true = child_output
            .slice(&[self.value_dim], &[1])?
            .max_out(&self.dims_to_eliminate)?;
        let values: Vec<usize> = any_true
            .keys()
            .map(|key| any_true.get(&key).map(|x| usize::from(x > 0.5)))
            .collect::<std::result::Result<_, _>>()?;
        Ok(output_weights.indicator_from_values(&values)?)
    }
}

fn all_assignments(vars: &VariableSet) -> Result<Vec<Assignment>> {
    let nums = vars.nums();
    KeyIter::new(&vars.sizes())
        .map(|key| Assignment::from_key(&nums, &key).map_err(QueryError::from))
        .collect()
}

fn lookup(vars: &[VarId], index: usize) -> Result<VarId> {
    vars.get(index)
        .copied()
        .ok_or_else(|| QueryError::InvalidTree(format!("ILP variable {} is missing", index)))
}
