//! Query error types
//!
//! Defines all error conditions that can occur during query parsing and execution.

use crate::model::AdapterError;
use crate::storage::{ErrorKind, StorageError};
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Failure reported by the asset-model adapter, passed through unchanged
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// Operand, range, grouping or option rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Condition text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// No adapter query session could be opened
    #[error("Query session unavailable: {0}")]
    SessionUnavailable(String),

    /// Allocation failed while buffering results
    #[error("Out of memory while buffering {0} results")]
    OutOfMemory(usize),
}

impl QueryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        QueryError::InvalidArgument(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Storage(e) => e.kind(),
            QueryError::Adapter(AdapterError::NotFound(_)) => ErrorKind::NotFound,
            QueryError::Adapter(_) => ErrorKind::Adapter,
            QueryError::InvalidArgument(_) | QueryError::Parse(_) => ErrorKind::InvalidArgument,
            QueryError::SessionUnavailable(_) => ErrorKind::SessionUnavailable,
            QueryError::OutOfMemory(_) => ErrorKind::OutOfMemory,
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
