//! Log-space weight tensors for structured-query inference.
//!
//! This crate provides the numeric substrate of the groundquery workspace:
//!
//! - **DenseTensor**: a dense array whose axes are numbered variables, with
//!   broadcasting arithmetic, sum/max marginalization and argmax bookkeeping
//! - **WeightedRelationTable**: a tensor split into *index* variables
//!   (entities) and *value* variables (true/false), one boolean factor per
//!   index assignment
//! - **Relabeling / Assignment**: renumbering of variables between tables
//!
//! # Architecture
//!
//! ```text
//! VariableSet ──► WeightedRelationTable ──► best_assignment()
//!      │                  │                    (0/1 indicator)
//!  Relabeling        DenseTensor ──► argmax_out() ──► MaxMarginal
//! ```

mod error;
mod table;
mod tensor;
mod variables;

pub use error::{Result, TensorError};
pub use table::WeightedRelationTable;
pub use tensor::{
    key_to_linear, linear_to_key, DenseTensor, KeyIter, Marginalization, MaxMarginal,
};
pub use variables::{
    Assignment, DiscreteVariable, Relabeling, VarNum, VariableSet, FALSE_INDEX, FALSE_OUTCOME,
    TRUE_INDEX, TRUE_OUTCOME,
};
