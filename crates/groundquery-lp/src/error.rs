//! Error types for model construction, solving and engine pooling.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LpError {
    #[error("Linear program is infeasible")]
    Infeasible,

    #[error("Linear program is unbounded")]
    Unbounded,

    #[error("Solve stopped at the {what} before proving optimality")]
    LimitReached { what: String },

    #[error("Simplex iteration limit of {0} exceeded")]
    IterationLimit(usize),

    #[error("Unknown variable id {0}")]
    UnknownVariable(usize),

    #[error("All {size} solver engines are in use")]
    PoolExhausted { size: usize },

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

/// Result type for LP operations.
pub type Result<T> = std::result::Result<T, LpError>;
