//! Ready-made task implementations: value-producing tasks and tasks gated on
//! the completion of other tasks.

pub mod dependent;
pub mod value;

pub use dependent::DependentTask;
pub use value::{AsyncValue, AsyncValueTask, DependentValueTask};
