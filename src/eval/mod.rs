//! Reference evaluator.
//!
//! `evaluate` and `apply` are pure functions over documents and define the
//! semantics every backend has to reproduce. The in-memory collection uses
//! them directly; other backends go through [`ExpressionTranslator`].

mod condition;
mod modification;
mod text;
mod translate;

pub use condition::{evaluate, matches};
pub use modification::{apply, apply_to};
pub use translate::{CompiledFilter, CompiledTranslator, CompiledUpdate, ExpressionTranslator};
