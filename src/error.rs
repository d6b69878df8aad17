//! Error types for the query path.
//!
//! Every failure is surfaced synchronously to the caller as a terminal
//! error; nothing in this crate retries internally. Cache-store failures
//! are the one exception to loud failure: they degrade to a cache miss
//! inside the cache adapter and never reach this type.

use std::fmt;

/// Error type for query building, binding and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// A column was referenced (in a write, filter or bind-type lookup)
    /// that the entity's column schema does not declare.
    InvalidColumn(String),
    /// Malformed call shape: non-scalar value where a scalar was expected,
    /// unsupported dynamic method name, invalid builder usage.
    InvalidArgument(String),
    /// Insert or update attempted with no columns staged for write.
    MissingWriteColumns,
    /// The backend rejected the SQL text or raised an execution error.
    /// Carries the backend's diagnostic text.
    InvalidStatement(String),
    /// Staged value count and inferred bind-type count disagree.
    BindMismatch {
        /// Number of staged values.
        values: usize,
        /// Number of resolved bind types.
        types: usize,
    },
    /// Session acquisition or configuration failure.
    Connection(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::InvalidColumn(column) => {
                write!(f, "Invalid DB column {column}")
            }
            DbError::InvalidArgument(msg) => {
                write!(f, "Invalid argument: {msg}")
            }
            DbError::MissingWriteColumns => {
                write!(f, "No columns staged for write; did you forget to set a field?")
            }
            DbError::InvalidStatement(msg) => {
                write!(f, "Invalid statement: {msg}")
            }
            DbError::BindMismatch { values, types } => {
                write!(f, "Bind mismatch: {values} value(s) staged but {types} bind type(s) resolved")
            }
            DbError::Connection(msg) => {
                write!(f, "Connection error: {msg}")
            }
        }
    }
}

impl std::error::Error for DbError {}
