//! The [`OssStore`] trait defining the persistence contract for schemas and
//! operation schemas.
//!
//! Every write is atomic on its own. Multi-step edits are grouped with
//! [`OssStore::begin`] / [`OssStore::commit`] / [`OssStore::rollback`], which
//! the propagation layer drives through its `atomic` helper.
//!
//! Both backends ([`InMemoryStore`](crate::memory::InMemoryStore) and
//! [`SqliteStore`](crate::sqlite::SqliteStore)) implement this trait with
//! identical semantics, including the cascade of constituent deletes into
//! the link records that reference them.

use cstform_core::id::{
    ArgumentId, ConstituentId, InheritanceId, OperationId, OssId, SchemaId, SubstitutionId,
};
use cstform_core::{
    Argument, Constituent, ConstituentDraft, Inheritance, Operation, OperationType, Oss, Schema,
    Substitution,
};

use crate::error::StorageError;

/// The storage contract for schemas, operation schemas and their links.
///
/// The trait is synchronous; callers own the store exclusively for the
/// duration of an edit.
pub trait OssStore {
    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    /// Opens a transaction. Nested transactions are rejected.
    fn begin(&mut self) -> Result<(), StorageError>;

    /// Makes every write since [`begin`](OssStore::begin) durable.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discards every write since [`begin`](OssStore::begin).
    fn rollback(&mut self) -> Result<(), StorageError>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    // -------------------------------------------------------------------
    // Schemas
    // -------------------------------------------------------------------

    /// Creates an empty schema.
    fn create_schema(&mut self, alias: &str, title: &str) -> Result<Schema, StorageError>;

    fn get_schema(&self, id: SchemaId) -> Result<Schema, StorageError>;

    fn list_schemas(&self) -> Result<Vec<Schema>, StorageError>;

    // -------------------------------------------------------------------
    // Constituents
    // -------------------------------------------------------------------

    /// Loads all constituents of a schema sorted by their order.
    fn load_constituents(&self, schema: SchemaId) -> Result<Vec<Constituent>, StorageError>;

    fn get_constituent(&self, id: ConstituentId) -> Result<Constituent, StorageError>;

    /// Inserts `drafts` into `schema`, assigning orders `first_order..`.
    ///
    /// Returns the stored constituents in the same order as `drafts`.
    fn insert_constituents(
        &mut self,
        schema: SchemaId,
        first_order: u32,
        drafts: &[ConstituentDraft],
    ) -> Result<Vec<Constituent>, StorageError>;

    /// Overwrites the stored payload (alias, kind, order and texts) of every
    /// given constituent in one write.
    fn update_constituents(&mut self, items: &[Constituent]) -> Result<(), StorageError>;

    /// Deletes constituents together with every substitution and inheritance
    /// record that names one of them.
    fn delete_constituents(&mut self, ids: &[ConstituentId]) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Operation schemas and operations
    // -------------------------------------------------------------------

    fn create_oss(&mut self, alias: &str) -> Result<Oss, StorageError>;

    fn get_oss(&self, id: OssId) -> Result<Oss, StorageError>;

    fn create_operation(
        &mut self,
        oss: OssId,
        operation_type: OperationType,
        alias: &str,
        result: Option<SchemaId>,
    ) -> Result<Operation, StorageError>;

    fn get_operation(&self, id: OperationId) -> Result<Operation, StorageError>;

    /// Lists the operations of an operation schema in creation order.
    fn list_operations(&self, oss: OssId) -> Result<Vec<Operation>, StorageError>;

    /// Finds every operation (across operation schemas) whose result is
    /// `schema`.
    fn find_operations_by_result(&self, schema: SchemaId) -> Result<Vec<Operation>, StorageError>;

    fn set_operation_result(
        &mut self,
        id: OperationId,
        result: Option<SchemaId>,
    ) -> Result<(), StorageError>;

    /// Deletes an operation with its arguments, substitutions and
    /// inheritance records. The result schema is left untouched.
    fn delete_operation(&mut self, id: OperationId) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------

    fn create_argument(
        &mut self,
        operation: OperationId,
        argument: OperationId,
        order: u32,
    ) -> Result<Argument, StorageError>;

    /// Lists the arguments of all operations in `oss`, sorted by operation
    /// and then by argument order.
    fn list_arguments(&self, oss: OssId) -> Result<Vec<Argument>, StorageError>;

    fn delete_argument(&mut self, id: ArgumentId) -> Result<(), StorageError>;

    fn create_substitution(
        &mut self,
        operation: OperationId,
        original: ConstituentId,
        substitution: ConstituentId,
    ) -> Result<Substitution, StorageError>;

    fn list_substitutions(&self, oss: OssId) -> Result<Vec<Substitution>, StorageError>;

    fn update_substitution(&mut self, item: &Substitution) -> Result<(), StorageError>;

    fn delete_substitution(&mut self, id: SubstitutionId) -> Result<(), StorageError>;

    /// Records `parent -> child` inheritance for every pair in one write.
    fn create_inheritance(
        &mut self,
        operation: OperationId,
        links: &[(ConstituentId, ConstituentId)],
    ) -> Result<Vec<Inheritance>, StorageError>;

    fn list_inheritance(&self, oss: OssId) -> Result<Vec<Inheritance>, StorageError>;

    fn update_inheritance(&mut self, item: &Inheritance) -> Result<(), StorageError>;

    fn delete_inheritance(&mut self, id: InheritanceId) -> Result<(), StorageError>;
}
