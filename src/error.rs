//! Error types for the vector store.
//!
//! This module provides structured error types using thiserror with
//! actionable error messages. All structural and input errors are returned
//! to the caller, never swallowed; numerical edge cases (zero-norm vectors,
//! duplicate points) are handled by documented conventions instead.

use crate::types::VectorId;
use thiserror::Error;

/// Main error type for vector store operations.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Vector not found: ID {0}\nSuggestion: Verify the id was returned by insert and has not been deleted"
    )]
    NotFound(VectorId),

    #[error(
        "Empty input: cannot build an index over zero vectors\nSuggestion: Insert records before calling rebuild"
    )]
    EmptyInput,

    #[error("Query cancelled by caller before completion")]
    Cancelled,

    #[error(
        "Persisted state is corrupt: {0}\nSuggestion: Restore the log from backup; the index snapshot can be deleted and rebuilt, the log cannot"
    )]
    CorruptPersistedState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}\nSuggestion: Check disk space and file permissions")]
    Io(#[from] std::io::Error),
}

/// Result type alias for vector store operations.
pub type IndexResult<T> = Result<T, IndexError>;
