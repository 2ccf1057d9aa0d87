//! Evaluation of module instances: the fixpoint loop, expansion and module
//! call instantiation.

mod evaluator;
mod expand;
pub mod module;

pub use evaluator::{EvalState, Evaluator};
pub use module::{Module, ModuleCall};
