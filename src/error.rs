//! Error types for the storage engine.
//!
//! All public APIs return `StoreResult<T>` — no panics in library code on bad
//! user input or on-disk corruption; both surface as a `StoreError` variant.

use thiserror::Error;

/// Unified error type for every operation in this crate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An attribute was missing on insert, or referenced but unknown in a
    /// WHERE/SELECT column list.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A PK or `is_key` column rejected an insert because the value already
    /// exists.
    #[error("duplicate key on '{table}.{column}': value already indexed")]
    DuplicateKey { table: String, column: String },

    /// An operation the engine deliberately refuses: hash range search, a
    /// non-POINT spatial predicate, or DELETE without WHERE.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A WHERE/range/spatial predicate referenced a column with no usable
    /// index of the required kind.
    #[error("missing index on '{table}.{column}'")]
    MissingIndex { table: String, column: String },

    /// The SQL text did not match any recognized statement shape.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Underlying file I/O failed.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A value could not be coerced to its column's declared type.
    #[error("type coercion failed for '{column}': {reason}")]
    TypeCoercionFailed { column: String, reason: String },

    /// On-disk structure violated an invariant this engine relies on
    /// (corrupted free-list, truncated heap file, bad sidecar).
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A catalog/index sidecar failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The named table is not in the catalog.
    #[error("table '{0}' not found")]
    TableNotFound(String),
}

/// Result alias used on every fallible public function in this crate.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for StoreError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
