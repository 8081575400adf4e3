//! Storage error types for cstform-storage.
//!
//! [`StorageError`] covers all anticipated failure modes in the storage
//! layer: serialization, SQLite and migration failures, record-not-found
//! variants for each record kind, integrity violations and misuse of the
//! transaction boundary.

use thiserror::Error;

use cstform_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored value could not be decoded into the data model.
    #[error("decode error: {0}")]
    Decode(#[from] CoreError),

    /// A schema with the given ID was not found.
    #[error("schema not found: {0}")]
    SchemaNotFound(i64),

    /// An operation schema with the given ID was not found.
    #[error("operation schema not found: {0}")]
    OssNotFound(i64),

    /// A constituent with the given ID was not found.
    #[error("constituent not found: {0}")]
    ConstituentNotFound(i64),

    /// An operation with the given ID was not found.
    #[error("operation not found: {0}")]
    OperationNotFound(i64),

    /// An argument with the given ID was not found.
    #[error("argument not found: {0}")]
    ArgumentNotFound(i64),

    /// A substitution with the given ID was not found.
    #[error("substitution not found: {0}")]
    SubstitutionNotFound(i64),

    /// An inheritance record with the given ID was not found.
    #[error("inheritance not found: {0}")]
    InheritanceNotFound(i64),

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// begin/commit/rollback called out of sequence.
    #[error("transaction error: {reason}")]
    Transaction { reason: String },
}
