//! Error types for query inference.

use groundquery_lp::LpError;
use groundquery_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The solver found no assignment satisfying every hard constraint, or
    /// stopped at a configured limit before finding one.
    #[error("No feasible assignment: {0}")]
    InfeasibleQuery(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("All {pool_size} solver engines are in use")]
    SolverResourceExhaustion { pool_size: usize },

    #[error("Numeric invariant violated: {0}")]
    NumericInvariantViolation(String),

    #[error("Invalid query tree: {0}")]
    InvalidTree(String),

    #[error("Solver error: {0}")]
    Solver(LpError),

    #[error("Tensor error: {0}")]
    Tensor(TensorError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<TensorError> for QueryError {
    fn from(err: TensorError) -> Self {
        match err {
            TensorError::NumericInvariantViolation(msg) => {
                QueryError::NumericInvariantViolation(msg)
            }
            other => QueryError::Tensor(other),
        }
    }
}

impl From<LpError> for QueryError {
    fn from(err: LpError) -> Self {
        match err {
            LpError::Infeasible | LpError::LimitReached { .. } => {
                QueryError::InfeasibleQuery(err.to_string())
            }
            LpError::PoolExhausted { size } => {
                QueryError::SolverResourceExhaustion { pool_size: size }
            }
            other => QueryError::Solver(other),
        }
    }
}

/// Result type for query inference.
pub type Result<T> = std::result::Result<T, QueryError>;
