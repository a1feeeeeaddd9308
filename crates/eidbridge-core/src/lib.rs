//! Shared vocabulary of the eID bridge: commands, retriable error reasons,
//! protocol constants and the core error type.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Command, CommandType, RetriableError};

/// Crate version, reported as `appVersion` in authentication tokens.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
