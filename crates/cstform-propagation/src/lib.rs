//! Change propagation for operation schemas.
//!
//! An operation schema (OSS) is a DAG of operations: input operations bind a
//! schema, synthesis operations merge the result schemas of their arguments
//! into a new one. Every constituent of a synthesized schema is linked to
//! its prototype by an inheritance record, and constituents identified
//! during synthesis are linked by substitution records. This crate keeps the
//! downstream schemas in sync when an upstream schema is edited.
//!
//! # Modules
//!
//! - [`schema_view`]: [`SchemaView`], an ordered write-through view of one
//!   schema with all local mutations
//! - [`cache`]: [`OssCache`] and the [`LinkIndex`] lookup trait
//! - [`mapping`]: translation of references into a downstream vocabulary
//! - [`engine`]: [`PropagationEngine`], the recursive cascades
//! - [`facade`]: [`PropagationFacade`] hooks and the [`atomic`] helper
//! - [`error`]: [`PropagationError`]

pub mod cache;
pub mod engine;
pub mod error;
pub mod facade;
pub mod mapping;
pub mod schema_view;

pub use cache::{LinkIndex, OssCache};
pub use engine::PropagationEngine;
pub use error::PropagationError;
pub use facade::{atomic, PropagationFacade};
pub use mapping::DependencyMapping;
pub use schema_view::SchemaView;
