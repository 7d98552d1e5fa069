//! Error types for tensor and relation-table operations.

use thiserror::Error;

use crate::VarNum;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Dimension mismatch: expected {expected:?}, got {got:?}")]
    DimensionMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Dimensions must be strictly increasing, got {0:?}")]
    UnsortedDimensions(Vec<VarNum>),

    #[error("Dimension {0} is not present")]
    UnknownDimension(VarNum),

    #[error("Dimension {0} occurs more than once")]
    DuplicateDimension(VarNum),

    #[error("Dimension {dim} has invalid size {size}")]
    InvalidSize { dim: VarNum, size: usize },

    #[error("Index {index} out of bounds for dimension {dim} of size {size}")]
    IndexOutOfBounds { dim: VarNum, index: usize, size: usize },

    #[error("Invalid relabeling: {0}")]
    InvalidRelabeling(String),

    #[error("Invalid relation table: {0}")]
    InvalidTable(String),

    #[error("Numeric invariant violated: {0}")]
    NumericInvariantViolation(String),
}

/// Result type for tensor operations.
pub type Result<T> = std::result::Result<T, TensorError>;
