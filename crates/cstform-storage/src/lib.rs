//! Storage abstraction for schemas and operation schemas.
//!
//! Provides the [`OssStore`] trait defining the persistence contract that
//! all backends implement, plus [`InMemoryStore`] and [`SqliteStore`] as
//! first-class backends.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`traits`]: OssStore trait definition
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: SQL schema and migration setup
//! - [`sqlite`]: SqliteStore implementation
//! - [`hash`]: blake3 fingerprints of schemas and link records

pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use hash::{hash_constituent, hash_links, hash_schema};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::OssStore;
