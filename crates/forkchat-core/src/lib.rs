//! forkchat Core Components
//!
//! This crate provides the session lifecycle and configuration on top of
//! the tree engine and context derivation crates.

mod config;
mod error;
mod session;

pub use config::{AppConfig, ContextConfig};
pub use error::CoreError;
pub use session::{AnswerPayload, Provenance, Session};
