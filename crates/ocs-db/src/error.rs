//! Error types for the document layer.

use ocs_core::CrdtError;
use thiserror::Error;

/// Errors that can occur in document operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Pointer is empty")]
    EmptyPointer,

    #[error("Expected an object key, found {found}")]
    ExpectedKey { found: String },

    #[error("Expected an array index, found {found}")]
    ExpectedIndex { found: String },

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Index {0} is not on a char boundary")]
    NotCharBoundary(usize),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Builder produced no value")]
    EmptyBuilder,

    #[error("Builder has {0} unclosed containers")]
    UnclosedContainers(usize),

    #[error(transparent)]
    Crdt(#[from] CrdtError),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
