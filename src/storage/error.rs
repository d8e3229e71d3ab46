//! Storage engine error types
//!
//! Defines all errors that can occur in the storage layer, plus the closed
//! `ErrorKind` taxonomy shared by every error type in the crate.

use crate::storage::types::{Timestamp, ValueType};
use thiserror::Error;

/// Closed classification of every failure the engine can report.
///
/// Success is represented by `Ok`, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown series, device or variable
    NotFound,
    /// Duplicate series id
    AlreadyExists,
    /// Value type incompatible with the series
    TypeMismatch,
    /// Operand, range or option rejected
    InvalidArgument,
    /// Explicit timestamp not newer than the latest stored point
    OutOfOrder,
    /// Opaque failure passed through from the asset-model adapter
    Adapter,
    /// No adapter query session could be opened
    SessionUnavailable,
    /// Allocation failed while buffering results
    OutOfMemory,
    /// Journal or filesystem failure
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::OutOfOrder => "out_of_order",
            ErrorKind::Adapter => "adapter_error",
            ErrorKind::SessionUnavailable => "session_unavailable",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::Io => "io_error",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// Requested series does not exist
    #[error("Series not found: {0}")]
    SeriesNotFound(String),

    /// A series with this id already exists
    #[error("Series already exists: {0}")]
    AlreadyExists(String),

    /// Value does not match the series type
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
    },

    /// Explicit timestamp is not newer than the latest stored point
    #[error("Out of order insert into {series}: time {time} is not after latest {latest}")]
    OutOfOrder {
        series: String,
        time: Timestamp,
        latest: Timestamp,
    },

    /// Invalid argument to a storage operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failed while copying points
    #[error("Out of memory while buffering {0} points")]
    OutOfMemory(usize),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, oversize record)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Journal format or replay error
    #[error("Journal error: {0}")]
    Journal(String),
}

impl StorageError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::SeriesNotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            StorageError::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            StorageError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StorageError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            StorageError::Io(_)
            | StorageError::Serialization(_)
            | StorageError::Corruption(_)
            | StorageError::Journal(_) => ErrorKind::Io,
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::SeriesNotFound("temp".to_string());
        assert_eq!(err.to_string(), "Series not found: temp");

        let err = StorageError::TypeMismatch {
            expected: ValueType::Float,
            found: ValueType::Str,
        };
        assert_eq!(err.to_string(), "Type mismatch: expected float, found str");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            StorageError::AlreadyExists("a".into()).kind(),
            ErrorKind::AlreadyExists
        );
        let err = StorageError::OutOfOrder {
            series: "a".into(),
            time: 1,
            latest: 2,
        };
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
        assert_eq!(ErrorKind::OutOfOrder.to_string(), "out_of_order");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert_eq!(storage_err.kind(), ErrorKind::Io);
    }
}
