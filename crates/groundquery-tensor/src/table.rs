//! Weighted relation tables: one boolean factor per index assignment.
//!
//! A [`WeightedRelationTable`] holds a log-space weight for every pair of an
//! index assignment (a tuple of entities) and a value assignment (true/false).
//! Index variables always carry lower numbers than value variables, so the
//! value dimensions are the trailing axes of the underlying tensor.

use crate::error::{Result, TensorError};
use crate::tensor::{key_to_linear, linear_to_key, DenseTensor, Marginalization, MaxMarginal};
use crate::variables::{Assignment, DiscreteVariable, Relabeling, VarNum, VariableSet};

#[derive(Clone, Debug, PartialEq)]
pub struct WeightedRelationTable {
    tensor: DenseTensor,
    index_vars: VariableSet,
    value_vars: VariableSet,
}

impl WeightedRelationTable {
    /// Create a table, checking that `tensor` spans exactly the index and
    /// value variables and that every index variable precedes every value variable.
    pub fn new(
        tensor: DenseTensor,
        index_vars: VariableSet,
        value_vars: VariableSet,
    ) -> Result<Self> {
        if value_vars.is_empty() {
            return Err(TensorError::InvalidTable(
                "a relation table needs at least one value variable".to_string(),
            ));
        }
        if let Some(shared) = index_vars.nums().into_iter().find(|n| value_vars.contains(*n)) {
            return Err(TensorError::DuplicateDimension(shared));
        }
        if let (Some(max_index), Some(min_value)) = (index_vars.max_num(), value_vars.min_num()) {
            if max_index > min_value {
                return Err(TensorError::InvalidTable(format!(
                    "index variable {} must precede value variable {}",
                    max_index, min_value
                )));
            }
        }
        let all = index_vars.union(&value_vars);
        if tensor.dims() != all.nums().as_slice() {
            return Err(TensorError::DimensionMismatch {
                expected: all.nums(),
                got: tensor.dims().to_vec(),
            });
        }
        if tensor.sizes() != all.sizes().as_slice() {
            return Err(TensorError::DimensionMismatch {
                expected: all.sizes(),
                got: tensor.sizes().to_vec(),
            });
        }
        Ok(Self {
            tensor,
            index_vars,
            value_vars,
        })
    }

    /// A table with every weight equal to `initial`.
    pub fn from_variables(
        index_vars: VariableSet,
        value_vars: VariableSet,
        initial: f64,
    ) -> Result<Self> {
        let all = index_vars.union(&value_vars);
        let tensor = DenseTensor::constant(all.nums(), all.sizes(), initial)?;
        Self::new(tensor, index_vars, value_vars)
    }

    /// Build a table with a single boolean value variable from per-index
    /// `(false_weight, true_weight)` pairs listed in row-major index order.
    pub fn from_boolean_weights(
        index_vars: VariableSet,
        value_num: VarNum,
        weights: &[(f64, f64)],
    ) -> Result<Self> {
        let value_vars = VariableSet::singleton(value_num, DiscreteVariable::boolean("truth"));
        let all = index_vars.union(&value_vars);
        let index_count: usize = index_vars.sizes().iter().product();
        if weights.len() != index_count {
            return Err(TensorError::DimensionMismatch {
                expected: vec![index_count],
                got: vec![weights.len()],
            });
        }
        let values: Vec<f64> = weights.iter().flat_map(|&(f, t)| [f, t]).collect();
        let tensor = DenseTensor::from_vec(all.nums(), all.sizes(), values)?;
        Self::new(tensor, index_vars, value_vars)
    }

    pub fn tensor(&self) -> &DenseTensor {
        &self.tensor
    }

    pub fn index_vars(&self) -> &VariableSet {
        &self.index_vars
    }

    pub fn value_vars(&self) -> &VariableSet {
        &self.value_vars
    }

    pub fn all_vars(&self) -> VariableSet {
        self.index_vars.union(&self.value_vars)
    }

    /// The number of the single value variable.
    pub fn value_num(&self) -> Result<VarNum> {
        self.value_vars.only_num()
    }

    /// Same variables, all weights zero.
    pub fn empty_copy(&self) -> Result<Self> {
        Self::from_variables(self.index_vars.clone(), self.value_vars.clone(), 0.0)
    }

    /// Add `other` (over a subset of our variables) to the weights.
    pub fn elementwise_add(&self, other: &DenseTensor) -> Result<Self> {
        Ok(Self {
            tensor: self.tensor.elementwise_add(other)?,
            index_vars: self.index_vars.clone(),
            value_vars: self.value_vars.clone(),
        })
    }

    /// In-place variant of [`WeightedRelationTable::elementwise_add`].
    pub fn add_assign(&mut self, other: &DenseTensor) -> Result<()> {
        self.tensor = self.tensor.elementwise_add(other)?;
        Ok(())
    }

    /// In-place `weights += multiplier * other`.
    pub fn add_scaled_assign(&mut self, other: &DenseTensor, multiplier: f64) -> Result<()> {
        self.tensor = self.tensor.add_scaled(other, multiplier)?;
        Ok(())
    }

    pub fn relabel_variables(&self, relabeling: &Relabeling) -> Result<Self> {
        Self::new(
            self.tensor.relabel(relabeling)?,
            relabeling.apply(&self.index_vars)?,
            relabeling.apply(&self.value_vars)?,
        )
    }

    pub fn marginalize(&self, dims: &[VarNum], mode: Marginalization) -> Result<DenseTensor> {
        self.tensor.marginalize(dims, mode)
    }

    /// Max out `dims`, keeping the argmax indicator over our own dimensions.
    pub fn argmax(&self, dims: &[VarNum]) -> Result<MaxMarginal> {
        self.tensor.argmax_out(dims)
    }

    /// Best value assignment for every index assignment, as a 0/1 indicator
    /// with exactly one `1` per index assignment.
    pub fn best_assignment(&self) -> Result<DenseTensor> {
        Ok(self.tensor.argmax_out(&self.value_vars.nums())?.indicator)
    }

    /// Total weight of an indicator assignment.
    pub fn assignment_weight(&self, assignment: &DenseTensor) -> Result<f64> {
        self.tensor.dot_indicator(assignment)
    }

    /// Number of index assignments (one ILP variable each).
    pub fn num_index_assignments(&self) -> usize {
        self.index_vars.sizes().iter().product()
    }

    pub fn assignment_to_linear_index(&self, key: &[usize]) -> Result<usize> {
        let sizes = self.index_vars.sizes();
        if key.len() != sizes.len() {
            return Err(TensorError::DimensionMismatch {
                expected: vec![sizes.len()],
                got: vec![key.len()],
            });
        }
        for ((&index, &size), dim) in key.iter().zip(&sizes).zip(self.index_vars.nums()) {
            if index >= size {
                return Err(TensorError::IndexOutOfBounds { dim, index, size });
            }
        }
        Ok(key_to_linear(&sizes, key))
    }

    pub fn linear_index_to_assignment(&self, index: usize) -> Result<Vec<usize>> {
        let count = self.num_index_assignments();
        if index >= count {
            return Err(TensorError::IndexOutOfBounds {
                dim: self.index_vars.min_num().unwrap_or(0),
                index,
                size: count,
            });
        }
        Ok(linear_to_key(&self.index_vars.sizes(), index))
    }

    /// Linear index of an index-variable assignment given as an [`Assignment`].
    pub fn ilp_variable_index(&self, assignment: &Assignment) -> Result<usize> {
        let key = assignment.key_for(&self.index_vars.nums())?;
        self.assignment_to_linear_index(&key)
    }

    pub fn ilp_index_to_assignment(&self, index: usize) -> Result<Assignment> {
        let key = self.linear_index_to_assignment(index)?;
        Assignment::from_key(&self.index_vars.nums(), &key)
    }

    /// Build an indicator over this table's variables from one value outcome
    /// per index assignment (row-major index order).
    pub fn indicator_from_values(&self, values: &[usize]) -> Result<DenseTensor> {
        let count = self.num_index_assignments();
        if values.len() != count {
            return Err(TensorError::DimensionMismatch {
                expected: vec![count],
                got: vec![values.len()],
            });
        }
        let value_size = self.value_vars.sizes().iter().product::<usize>();
        let mut indicator =
            DenseTensor::zeros(self.tensor.dims().to_vec(), self.tensor.sizes().to_vec())?;
        for (index, &value) in values.iter().enumerate() {
            if value >= value_size {
                return Err(TensorError::IndexOutOfBounds {
                    dim: self.value_num()?,
                    index: value,
                    size: value_size,
                });
            }
            let mut key = linear_to_key(&self.index_vars.sizes(), index);
            key.extend(linear_to_key(&self.value_vars.sizes(), value));
            indicator.set(&key, 1.0)?;
        }
        Ok(indicator)
    }

    /// Lists the index tuples an indicator assigns to true, e.g. `{[x] [y] }`.
    pub fn assignment_string(&self, assignment: &DenseTensor) -> Result<String> {
        let value_nums = self.value_vars.nums();
        let ones = vec![1; value_nums.len()];
        let sliced = assignment.slice(&value_nums, &ones)?;
        let mut out = String::from("{");
        for key in sliced.nonzero_keys() {
            out.push_str(&self.index_vars.key_string(&key));
            out.push(' ');
        }
        out.push('}');
        Ok(out)
    }
}
