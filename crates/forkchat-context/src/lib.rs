//! forkchat context derivation
//!
//! Renders the ancestor chain of a conversation node into the context
//! block that precedes a follow-up question.

mod error;
mod manager;
mod render;

pub use error::{ContextError, Result};
pub use manager::{prepare_question, PreparedQuestion};
pub use render::{build_prompt, ContextBuilder};
