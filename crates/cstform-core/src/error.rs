//! Core error types for cstform-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the data model and the graph utilities.

use thiserror::Error;

/// Core errors produced by the cstform-core crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A cycle was found where the graph must be acyclic.
    #[error("graph contains a cycle through node {node}")]
    GraphCycle { node: String },

    /// An alias does not start with a known constituent type prefix.
    #[error("invalid alias: '{alias}'")]
    InvalidAlias { alias: String },

    /// An alias is already taken inside the schema.
    #[error("duplicate alias: '{alias}'")]
    DuplicateAlias { alias: String },

    /// A constituent type code could not be decoded.
    #[error("unknown constituent type: '{code}'")]
    UnknownConstituentType { code: String },

    /// An operation type code could not be decoded.
    #[error("unknown operation type: '{code}'")]
    UnknownOperationType { code: String },
}
