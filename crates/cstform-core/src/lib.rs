//! Data model and graph utilities for conceptual schemas.
//!
//! - [`id`]: stable id newtypes
//! - [`constituent`]: constituents, kinds, aliases, partial updates
//! - [`operation`]: operation-schema records
//! - [`graph`]: [`DirectedGraph`] with stable topological sorting
//! - [`text`]: reference syntax and the [`TextResolver`] collaborator
//! - [`error`]: [`CoreError`]

pub mod constituent;
pub mod error;
pub mod graph;
pub mod id;
pub mod operation;
pub mod text;

// Re-export commonly used types
pub use constituent::{
    make_alias, parse_alias, Constituent, ConstituentDraft, CstType, CstUpdate, TermForm,
};
pub use error::CoreError;
pub use graph::DirectedGraph;
pub use id::{
    ArgumentId, ConstituentId, InheritanceId, OperationId, OssId, SchemaId, SubstitutionId,
};
pub use operation::{Argument, Inheritance, Operation, OperationType, Oss, Schema, Substitution};
pub use text::{
    extract_globals, replace_globals, AliasMapping, EntityReferenceResolver, TermContext,
    TextResolver, DELETED_ALIAS,
};
