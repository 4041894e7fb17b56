//! Error types for kind parsing.

use thiserror::Error;

/// Errors that can occur when parsing application kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// The kind string is empty.
    #[error("application kind cannot be empty")]
    Empty,

    /// The kind is not one of the known applications.
    #[error("unknown application kind: '{0}'")]
    UnknownKind(String),
}
