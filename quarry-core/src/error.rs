// quarry-core/src/error.rs
// Error taxonomy for the query engine

use thiserror::Error;

use crate::document::DocumentId;

/// Errors raised by collection, index, query and aggregation operations
#[derive(Error, Debug)]
pub enum QuarryError {
    /// An explicit `_id` collided with a stored document
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(DocumentId),

    /// Lookup, update or drop on an absent entity
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index already exists: {0}")]
    IndexExists(String),

    /// No index covers a usable prefix of the filter.
    /// The planner treats this as "fall back to a full scan".
    #[error("No index covers the filter")]
    NoIndexCoverage,

    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    /// Per-document evaluation failure inside an aggregation expression
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuarryError>;
