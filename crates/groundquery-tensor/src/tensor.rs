//! Dense tensors whose axes are identified by variable numbers.
//!
//! Axes are always stored in ascending [`VarNum`] order, so two tensors over
//! the same variables share a layout and a tensor over a subset of another
//! tensor's variables can be broadcast against it.
//!
//! Weights are unnormalized log-scores: `-inf` marks a forbidden outcome.
//! Operations that would combine `0` with an infinity multiplicatively, or add
//! infinities of opposite sign, fail with
//! [`TensorError::NumericInvariantViolation`] instead of producing NaN.

use scirs2_core::ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{Result, TensorError};
use crate::variables::{Relabeling, VarNum};

/// Reduction applied by [`DenseTensor::marginalize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marginalization {
    Sum,
    Max,
}

/// A dense tensor over numbered dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseTensor {
    dims: Vec<VarNum>,
    values: ArrayD<f64>,
}

/// Result of a max-marginalization with argmax bookkeeping.
///
/// `indicator` lives over the *original* dimensions and holds exactly one `1`
/// per key of `maxima`, at the position that achieved the maximum.
#[derive(Clone, Debug, PartialEq)]
pub struct MaxMarginal {
    pub maxima: DenseTensor,
    pub indicator: DenseTensor,
    backpointers: Vec<usize>,
}

impl MaxMarginal {
    /// Linear index (into the original tensor) of the maximizer of the
    /// `reduced_index`-th entry of `maxima`.
    pub fn backpointer(&self, reduced_index: usize) -> Option<usize> {
        self.backpointers.get(reduced_index).copied()
    }
}

/// Row-major iterator over every key of a shape.
#[derive(Clone, Debug)]
pub struct KeyIter {
    sizes: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl KeyIter {
    pub fn new(sizes: &[usize]) -> Self {
        let next = if sizes.iter().any(|&s| s == 0) {
            None
        } else {
            Some(vec![0; sizes.len()])
        };
        Self {
            sizes: sizes.to_vec(),
            next,
        }
    }
}

impl Iterator for KeyIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut successor = current.clone();
        let mut advanced = false;
        for axis in (0..successor.len()).rev() {
            successor[axis] += 1;
            if successor[axis] < self.sizes[axis] {
                advanced = true;
                break;
            }
            successor[axis] = 0;
        }
        if advanced {
            self.next = Some(successor);
        }
        Some(current)
    }
}

/// Row-major linear index of `key` in a tensor of shape `sizes`.
pub fn key_to_linear(sizes: &[usize], key: &[usize]) -> usize {
    key.iter()
        .zip(sizes)
        .fold(0, |acc, (&k, &size)| acc * size + k)
}

/// Inverse of [`key_to_linear`].
pub fn linear_to_key(sizes: &[usize], mut index: usize) -> Vec<usize> {
    let mut key = vec![0; sizes.len()];
    for axis in (0..sizes.len()).rev() {
        key[axis] = index % sizes[axis];
        index /= sizes[axis];
    }
    key
}

fn checked_add(a: f64, b: f64) -> Result<f64> {
    if a.is_infinite() && b.is_infinite() && a.signum() != b.signum() {
        return Err(TensorError::NumericInvariantViolation(format!(
            "{} + {} is undefined",
            a, b
        )));
    }
    Ok(a + b)
}

fn checked_mul(a: f64, b: f64) -> Result<f64> {
    if (a == 0.0 && b.is_infinite()) || (b == 0.0 && a.is_infinite()) {
        return Err(TensorError::NumericInvariantViolation(format!(
            "{} * {} is undefined",
            a, b
        )));
    }
    Ok(a * b)
}

fn validate_dims(dims: &[VarNum]) -> Result<()> {
    for pair in dims.windows(2) {
        if pair[0] == pair[1] {
            return Err(TensorError::DuplicateDimension(pair[0]));
        }
        if pair[0] > pair[1] {
            return Err(TensorError::UnsortedDimensions(dims.to_vec()));
        }
    }
    Ok(())
}

impl DenseTensor {
    /// Wrap an array whose axes correspond to `dims` (strictly ascending).
    pub fn new(dims: Vec<VarNum>, values: ArrayD<f64>) -> Result<Self> {
        validate_dims(&dims)?;
        if values.ndim() != dims.len() {
            return Err(TensorError::DimensionMismatch {
                expected: vec![dims.len()],
                got: vec![values.ndim()],
            });
        }
        if let Some((axis, _)) = values.shape().iter().enumerate().find(|(_, &s)| s == 0) {
            return Err(TensorError::InvalidSize {
                dim: dims[axis],
                size: 0,
            });
        }
        Ok(Self { dims, values })
    }

    /// Build from row-major values.
    pub fn from_vec(dims: Vec<VarNum>, sizes: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let expected: usize = sizes.iter().product();
        if values.len() != expected || sizes.len() != dims.len() {
            return Err(TensorError::DimensionMismatch {
                expected: sizes,
                got: vec![values.len()],
            });
        }
        let array = ArrayD::from_shape_vec(IxDyn(&sizes), values).map_err(|_| {
            TensorError::DimensionMismatch {
                expected: vec![expected],
                got: vec![],
            }
        })?;
        Self::new(dims, array)
    }

    /// Build by evaluating `f` at every key, in row-major order.
    pub fn from_fn<F>(dims: Vec<VarNum>, sizes: Vec<usize>, mut f: F) -> Result<Self>
    where
        F: FnMut(&[usize]) -> f64,
    {
        let values: Vec<f64> = KeyIter::new(&sizes).map(|key| f(&key)).collect();
        Self::from_vec(dims, sizes, values)
    }

    pub fn constant(dims: Vec<VarNum>, sizes: Vec<usize>, value: f64) -> Result<Self> {
        if sizes.len() != dims.len() {
            return Err(TensorError::DimensionMismatch {
                expected: vec![dims.len()],
                got: vec![sizes.len()],
            });
        }
        Self::new(dims, ArrayD::from_elem(IxDyn(&sizes), value))
    }

    pub fn zeros(dims: Vec<VarNum>, sizes: Vec<usize>) -> Result<Self> {
        Self::constant(dims, sizes, 0.0)
    }

    /// A zero-dimensional tensor.
    pub fn scalar(value: f64) -> Self {
        Self {
            dims: Vec::new(),
            values: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    pub fn dims(&self) -> &[VarNum] {
        &self.dims
    }

    pub fn sizes(&self) -> &[usize] {
        self.values.shape()
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn axis_of(&self, dim: VarNum) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }

    pub fn size_of(&self, dim: VarNum) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.sizes()[axis])
    }

    /// Every key in row-major order.
    pub fn keys(&self) -> KeyIter {
        KeyIter::new(self.sizes())
    }

    fn check_key(&self, key: &[usize]) -> Result<()> {
        if key.len() != self.dims.len() {
            return Err(TensorError::DimensionMismatch {
                expected: vec![self.dims.len()],
                got: vec![key.len()],
            });
        }
        for ((&index, &size), &dim) in key.iter().zip(self.sizes()).zip(&self.dims) {
            if index >= size {
                return Err(TensorError::IndexOutOfBounds { dim, index, size });
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &[usize]) -> Result<f64> {
        self.check_key(key)?;
        Ok(self.values[key])
    }

    pub fn set(&mut self, key: &[usize], value: f64) -> Result<()> {
        self.check_key(key)?;
        self.values[key] = value;
        Ok(())
    }

    pub fn key_to_linear(&self, key: &[usize]) -> Result<usize> {
        self.check_key(key)?;
        Ok(key_to_linear(self.sizes(), key))
    }

    pub fn linear_to_key(&self, index: usize) -> Result<Vec<usize>> {
        if index >= self.len() {
            return Err(TensorError::IndexOutOfBounds {
                dim: self.dims.first().copied().unwrap_or(0),
                index,
                size: self.len(),
            });
        }
        Ok(linear_to_key(self.sizes(), index))
    }

    pub fn get_linear(&self, index: usize) -> Result<f64> {
        let key = self.linear_to_key(index)?;
        Ok(self.values[key.as_slice()])
    }

    /// Keys whose value is non-zero, in row-major order.
    pub fn nonzero_keys(&self) -> Vec<Vec<usize>> {
        self.keys()
            .filter(|key| self.values[key.as_slice()] != 0.0)
            .collect()
    }

    /// Position of each of this tensor's axes inside `target`, checking sizes.
    fn positions_in(&self, target: &DenseTensor) -> Result<Vec<usize>> {
        self.dims
            .iter()
            .zip(self.sizes())
            .map(|(&dim, &size)| {
                let axis = target
                    .axis_of(dim)
                    .ok_or(TensorError::UnknownDimension(dim))?;
                if target.sizes()[axis] != size {
                    return Err(TensorError::DimensionMismatch {
                        expected: vec![target.sizes()[axis]],
                        got: vec![size],
                    });
                }
                Ok(axis)
            })
            .collect()
    }

    /// Combine with `other`, whose dimensions must be a subset of ours.
    fn zip_broadcast<F>(&self, other: &DenseTensor, op: F) -> Result<DenseTensor>
    where
        F: Fn(f64, f64) -> Result<f64>,
    {
        let positions = other.positions_in(self)?;
        let mut projected = vec![0; positions.len()];
        let mut values = Vec::with_capacity(self.len());
        for key in self.keys() {
            for (slot, &axis) in projected.iter_mut().zip(&positions) {
                *slot = key[axis];
            }
            values.push(op(
                self.values[key.as_slice()],
                other.values[projected.as_slice()],
            )?);
        }
        DenseTensor::from_vec(self.dims.clone(), self.sizes().to_vec(), values)
    }

    /// `self + other`, broadcasting `other` over our extra dimensions.
    pub fn elementwise_add(&self, other: &DenseTensor) -> Result<DenseTensor> {
        self.zip_broadcast(other, checked_add)
    }

    /// `self - other`, broadcasting `other` over our extra dimensions.
    pub fn elementwise_sub(&self, other: &DenseTensor) -> Result<DenseTensor> {
        self.zip_broadcast(other, |a, b| checked_add(a, -b))
    }

    /// `self * other`, broadcasting `other` over our extra dimensions.
    pub fn elementwise_product(&self, other: &DenseTensor) -> Result<DenseTensor> {
        self.zip_broadcast(other, checked_mul)
    }

    /// `self + multiplier * other`, broadcasting `other`.
    pub fn add_scaled(&self, other: &DenseTensor, multiplier: f64) -> Result<DenseTensor> {
        self.zip_broadcast(other, |a, b| checked_add(a, checked_mul(multiplier, b)?))
    }

    /// Product over the union of two disjoint dimension sets.
    pub fn outer_product(&self, other: &DenseTensor) -> Result<DenseTensor> {
        if let Some(&dim) = self.dims.iter().find(|d| other.dims.contains(d)) {
            return Err(TensorError::DuplicateDimension(dim));
        }
        let mut pairs: Vec<(VarNum, usize)> = self
            .dims
            .iter()
            .copied()
            .zip(self.sizes().iter().copied())
            .chain(other.dims.iter().copied().zip(other.sizes().iter().copied()))
            .collect();
        pairs.sort_unstable();
        let dims: Vec<VarNum> = pairs.iter().map(|p| p.0).collect();
        let sizes: Vec<usize> = pairs.iter().map(|p| p.1).collect();

        let own_axes: Vec<usize> = self
            .dims
            .iter()
            .map(|d| dims.iter().position(|x| x == d).unwrap_or(0))
            .collect();
        let other_axes: Vec<usize> = other
            .dims
            .iter()
            .map(|d| dims.iter().position(|x| x == d).unwrap_or(0))
            .collect();

        let mut values = Vec::new();
        for key in KeyIter::new(&sizes) {
            let own_key: Vec<usize> = own_axes.iter().map(|&a| key[a]).collect();
            let other_key: Vec<usize> = other_axes.iter().map(|&a| key[a]).collect();
            values.push(checked_mul(
                self.values[own_key.as_slice()],
                other.values[other_key.as_slice()],
            )?);
        }
        DenseTensor::from_vec(dims, sizes, values)
    }

    pub fn scale(&self, factor: f64) -> Result<DenseTensor> {
        if factor == 0.0 && self.values.iter().any(|v| v.is_infinite()) {
            return Err(TensorError::NumericInvariantViolation(
                "scaling an infinite weight by zero".to_string(),
            ));
        }
        Ok(self.map(|v| v * factor))
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> DenseTensor {
        DenseTensor {
            dims: self.dims.clone(),
            values: self.values.mapv(f),
        }
    }

    /// Elementwise natural log; indicator zeros become `-inf`.
    pub fn ln(&self) -> DenseTensor {
        self.map(f64::ln)
    }

    pub fn sum_all(&self) -> f64 {
        self.values.sum()
    }

    /// Sum of `self * indicator` over the entries where `indicator` is non-zero.
    ///
    /// Skipping zero entries keeps forbidden (`-inf`) weights that were not
    /// selected out of the result.
    pub fn dot_indicator(&self, indicator: &DenseTensor) -> Result<f64> {
        if indicator.dims != self.dims || indicator.sizes() != self.sizes() {
            return Err(TensorError::DimensionMismatch {
                expected: self.sizes().to_vec(),
                got: indicator.sizes().to_vec(),
            });
        }
        let mut total = 0.0;
        for key in indicator.nonzero_keys() {
            let term = checked_mul(self.values[key.as_slice()], indicator.values[key.as_slice()])?;
            total = checked_add(total, term)?;
        }
        Ok(total)
    }

    /// Sum out `dims`. Dimensions absent from this tensor are ignored.
    pub fn sum_out(&self, dims: &[VarNum]) -> Result<DenseTensor> {
        self.marginalize(dims, Marginalization::Sum)
    }

    /// Max out `dims`. Dimensions absent from this tensor are ignored.
    pub fn max_out(&self, dims: &[VarNum]) -> Result<DenseTensor> {
        self.marginalize(dims, Marginalization::Max)
    }

    pub fn marginalize(&self, dims: &[VarNum], mode: Marginalization) -> Result<DenseTensor> {
        let mut axes: Vec<usize> = dims.iter().filter_map(|&d| self.axis_of(d)).collect();
        axes.sort_unstable();
        axes.dedup();

        let mut values = self.values.clone();
        for &axis in axes.iter().rev() {
            values = match mode {
                Marginalization::Sum => values.sum_axis(Axis(axis)),
                Marginalization::Max => values.map_axis(Axis(axis), |view| {
                    view.iter().fold(f64::NEG_INFINITY, |acc, &x| acc.max(x))
                }),
            };
        }
        let kept: Vec<VarNum> = self
            .dims
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &d)| d)
            .collect();
        DenseTensor::new(kept, values)
    }

    /// Max out `dims`, recording which key achieved each maximum.
    ///
    /// Ties go to the first maximizer in row-major order of the original
    /// tensor, so repeated calls on the same tensor always agree.
    pub fn argmax_out(&self, dims: &[VarNum]) -> Result<MaxMarginal> {
        let kept_axes: Vec<usize> = (0..self.dims.len())
            .filter(|&axis| !dims.contains(&self.dims[axis]))
            .collect();
        let kept_dims: Vec<VarNum> = kept_axes.iter().map(|&a| self.dims[a]).collect();
        let kept_sizes: Vec<usize> = kept_axes.iter().map(|&a| self.sizes()[a]).collect();
        let reduced_len: usize = kept_sizes.iter().product();

        let mut best = vec![f64::NEG_INFINITY; reduced_len];
        let mut arg: Vec<Option<usize>> = vec![None; reduced_len];
        for (linear, key) in self.keys().enumerate() {
            let kept_key: Vec<usize> = kept_axes.iter().map(|&a| key[a]).collect();
            let slot = key_to_linear(&kept_sizes, &kept_key);
            let value = self.values[key.as_slice()];
            if arg[slot].is_none() || value > best[slot] {
                best[slot] = value;
                arg[slot] = Some(linear);
            }
        }

        let backpointers: Vec<usize> = arg.iter().map(|a| a.unwrap_or(0)).collect();
        let mut indicator = DenseTensor::zeros(self.dims.clone(), self.sizes().to_vec())?;
        for &linear in &backpointers {
            let key = linear_to_key(self.sizes(), linear);
            indicator.values[key.as_slice()] = 1.0;
        }
        Ok(MaxMarginal {
            maxima: DenseTensor::from_vec(kept_dims, kept_sizes, best)?,
            indicator,
            backpointers,
        })
    }

    /// Fix each of `dims` to the matching entry of `indices`, removing it.
    pub fn slice(&self, dims: &[VarNum], indices: &[usize]) -> Result<DenseTensor> {
        if dims.len() != indices.len() {
            return Err(TensorError::DimensionMismatch {
                expected: vec![dims.len()],
                got: vec![indices.len()],
            });
        }
        let mut fixed: Vec<(usize, usize)> = Vec::with_capacity(dims.len());
        for (&dim, &index) in dims.iter().zip(indices) {
            let axis = self.axis_of(dim).ok_or(TensorError::UnknownDimension(dim))?;
            let size = self.sizes()[axis];
            if index >= size {
                return Err(TensorError::IndexOutOfBounds { dim, index, size });
            }
            fixed.push((axis, index));
        }
        fixed.sort_unstable();

        let mut values = self.values.clone();
        for &(axis, index) in fixed.iter().rev() {
            values = values.index_axis(Axis(axis), index).to_owned();
        }
        let kept: Vec<VarNum> = self
            .dims
            .iter()
            .enumerate()
            .filter(|(axis, _)| !fixed.iter().any(|(a, _)| a == axis))
            .map(|(_, &d)| d)
            .collect();
        DenseTensor::new(kept, values)
    }

    /// Renumber dimensions; dimensions the relabeling does not map keep their number.
    pub fn relabel(&self, relabeling: &Relabeling) -> Result<DenseTensor> {
        let targets: Vec<VarNum> = self.dims.iter().map(|&d| relabeling.apply_num(d)).collect();
        let mut order: Vec<usize> = (0..targets.len()).collect();
        order.sort_by_key(|&axis| targets[axis]);
        let new_dims: Vec<VarNum> = order.iter().map(|&axis| targets[axis]).collect();
        validate_dims(&new_dims)?;
        let values = self.values.clone().permuted_axes(IxDyn(&order));
        DenseTensor::new(new_dims, values)
    }
}
