//! In-memory implementation of [`OssStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and for sessions
//! where persistence isn't needed. It keeps every table in an insertion
//! ordered map and mirrors the SQLite backend's semantics, including the
//! cascade of constituent and operation deletes. Transactions snapshot the
//! whole data set on `begin` and restore it on `rollback`.

use indexmap::IndexMap;

use cstform_core::id::{
    ArgumentId, ConstituentId, InheritanceId, OperationId, OssId, SchemaId, SubstitutionId,
};
use cstform_core::{
    Argument, Constituent, ConstituentDraft, Inheritance, Operation, OperationType, Oss, Schema,
    Substitution,
};

use crate::error::StorageError;
use crate::traits::OssStore;

/// All tables of the in-memory backend.
#[derive(Debug, Clone)]
struct Tables {
    schemas: IndexMap<SchemaId, Schema>,
    constituents: IndexMap<ConstituentId, Constituent>,
    oss: IndexMap<OssId, Oss>,
    operations: IndexMap<OperationId, Operation>,
    arguments: IndexMap<ArgumentId, Argument>,
    substitutions: IndexMap<SubstitutionId, Substitution>,
    inheritance: IndexMap<InheritanceId, Inheritance>,
    /// Shared id sequence; ids are never reused.
    next_id: i64,
}

impl Tables {
    fn new() -> Self {
        Tables {
            schemas: IndexMap::new(),
            constituents: IndexMap::new(),
            oss: IndexMap::new(),
            operations: IndexMap::new(),
            arguments: IndexMap::new(),
            substitutions: IndexMap::new(),
            inheritance: IndexMap::new(),
            next_id: 1,
        }
    }

    fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn operations_of(&self, oss: OssId) -> Vec<OperationId> {
        self.operations
            .values()
            .filter(|op| op.oss == oss)
            .map(|op| op.id)
            .collect()
    }
}

/// In-memory storage backend.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Tables,
    /// State captured by `begin`, restored by `rollback`.
    snapshot: Option<Tables>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        InMemoryStore {
            tables: Tables::new(),
            snapshot: None,
        }
    }

    fn require_schema(&self, id: SchemaId) -> Result<(), StorageError> {
        if self.tables.schemas.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::SchemaNotFound(id.0))
        }
    }

    fn require_oss(&self, id: OssId) -> Result<(), StorageError> {
        if self.tables.oss.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::OssNotFound(id.0))
        }
    }

    fn require_operation(&self, id: OperationId) -> Result<(), StorageError> {
        if self.tables.operations.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::OperationNotFound(id.0))
        }
    }

    fn require_constituent(&self, id: ConstituentId) -> Result<(), StorageError> {
        if self.tables.constituents.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::ConstituentNotFound(id.0))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OssStore for InMemoryStore {
    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.snapshot.is_some() {
            return Err(StorageError::Transaction {
                reason: "transaction already open".into(),
            });
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        match self.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(StorageError::Transaction {
                reason: "commit without an open transaction".into(),
            }),
        }
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        match self.snapshot.take() {
            Some(saved) => {
                self.tables = saved;
                Ok(())
            }
            None => Err(StorageError::Transaction {
                reason: "rollback without an open transaction".into(),
            }),
        }
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    // -------------------------------------------------------------------
    // Schemas
    // -------------------------------------------------------------------

    fn create_schema(&mut self, alias: &str, title: &str) -> Result<Schema, StorageError> {
        let schema = Schema {
            id: SchemaId(self.tables.allocate()),
            alias: alias.to_string(),
            title: title.to_string(),
        };
        self.tables.schemas.insert(schema.id, schema.clone());
        Ok(schema)
    }

    fn get_schema(&self, id: SchemaId) -> Result<Schema, StorageError> {
        self.tables
            .schemas
            .get(&id)
            .cloned()
            .ok_or(StorageError::SchemaNotFound(id.0))
    }

    fn list_schemas(&self) -> Result<Vec<Schema>, StorageError> {
        Ok(self.tables.schemas.values().cloned().collect())
    }

    // -------------------------------------------------------------------
    // Constituents
    // -------------------------------------------------------------------

    fn load_constituents(&self, schema: SchemaId) -> Result<Vec<Constituent>, StorageError> {
        self.require_schema(schema)?;
        let mut items: Vec<Constituent> = self
            .tables
            .constituents
            .values()
            .filter(|cst| cst.schema == schema)
            .cloned()
            .collect();
        items.sort_by_key(|cst| (cst.order, cst.id));
        Ok(items)
    }

    fn get_constituent(&self, id: ConstituentId) -> Result<Constituent, StorageError> {
        self.tables
            .constituents
            .get(&id)
            .cloned()
            .ok_or(StorageError::ConstituentNotFound(id.0))
    }

    fn insert_constituents(
        &mut self,
        schema: SchemaId,
        first_order: u32,
        drafts: &[ConstituentDraft],
    ) -> Result<Vec<Constituent>, StorageError> {
        self.require_schema(schema)?;
        let mut created = Vec::with_capacity(drafts.len());
        for (offset, draft) in drafts.iter().enumerate() {
            let id = ConstituentId(self.tables.allocate());
            let cst = draft
                .clone()
                .into_constituent(id, schema, first_order + offset as u32);
            self.tables.constituents.insert(id, cst.clone());
            created.push(cst);
        }
        Ok(created)
    }

    fn update_constituents(&mut self, items: &[Constituent]) -> Result<(), StorageError> {
        for item in items {
            self.require_constituent(item.id)?;
        }
        for item in items {
            self.tables.constituents.insert(item.id, item.clone());
        }
        Ok(())
    }

    fn delete_constituents(&mut self, ids: &[ConstituentId]) -> Result<(), StorageError> {
        for id in ids {
            self.require_constituent(*id)?;
        }
        for id in ids {
            self.tables.constituents.shift_remove(id);
        }
        self.tables
            .substitutions
            .retain(|_, sub| !ids.contains(&sub.original) && !ids.contains(&sub.substitution));
        self.tables
            .inheritance
            .retain(|_, link| !ids.contains(&link.parent) && !ids.contains(&link.child));
        Ok(())
    }

    // -------------------------------------------------------------------
    // Operation schemas and operations
    // -------------------------------------------------------------------

    fn create_oss(&mut self, alias: &str) -> Result<Oss, StorageError> {
        let oss = Oss {
            id: OssId(self.tables.allocate()),
            alias: alias.to_string(),
        };
        self.tables.oss.insert(oss.id, oss.clone());
        Ok(oss)
    }

    fn get_oss(&self, id: OssId) -> Result<Oss, StorageError> {
        self.tables
            .oss
            .get(&id)
            .cloned()
            .ok_or(StorageError::OssNotFound(id.0))
    }

    fn create_operation(
        &mut self,
        oss: OssId,
        operation_type: OperationType,
        alias: &str,
        result: Option<SchemaId>,
    ) -> Result<Operation, StorageError> {
        self.require_oss(oss)?;
        if let Some(schema) = result {
            self.require_schema(schema)?;
        }
        let operation = Operation {
            id: OperationId(self.tables.allocate()),
            oss,
            operation_type,
            alias: alias.to_string(),
            result,
        };
        self.tables
            .operations
            .insert(operation.id, operation.clone());
        Ok(operation)
    }

    fn get_operation(&self, id: OperationId) -> Result<Operation, StorageError> {
        self.tables
            .operations
            .get(&id)
            .cloned()
            .ok_or(StorageError::OperationNotFound(id.0))
    }

    fn list_operations(&self, oss: OssId) -> Result<Vec<Operation>, StorageError> {
        self.require_oss(oss)?;
        Ok(self
            .tables
            .operations
            .values()
            .filter(|op| op.oss == oss)
            .cloned()
            .collect())
    }

    fn find_operations_by_result(&self, schema: SchemaId) -> Result<Vec<Operation>, StorageError> {
        Ok(self
            .tables
            .operations
            .values()
            .filter(|op| op.result == Some(schema))
            .cloned()
            .collect())
    }

    fn set_operation_result(
        &mut self,
        id: OperationId,
        result: Option<SchemaId>,
    ) -> Result<(), StorageError> {
        if let Some(schema) = result {
            self.require_schema(schema)?;
        }
        let operation = self
            .tables
            .operations
            .get_mut(&id)
            .ok_or(StorageError::OperationNotFound(id.0))?;
        operation.result = result;
        Ok(())
    }

    fn delete_operation(&mut self, id: OperationId) -> Result<(), StorageError> {
        self.tables
            .operations
            .shift_remove(&id)
            .ok_or(StorageError::OperationNotFound(id.0))?;
        self.tables
            .arguments
            .retain(|_, arg| arg.operation != id && arg.argument != id);
        self.tables.substitutions.retain(|_, sub| sub.operation != id);
        self.tables.inheritance.retain(|_, link| link.operation != id);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------

    fn create_argument(
        &mut self,
        operation: OperationId,
        argument: OperationId,
        order: u32,
    ) -> Result<Argument, StorageError> {
        self.require_operation(operation)?;
        self.require_operation(argument)?;
        let duplicate = self
            .tables
            .arguments
            .values()
            .any(|arg| arg.operation == operation && arg.argument == argument);
        if duplicate {
            return Err(StorageError::IntegrityError {
                reason: format!("operation {} already takes {} as argument", operation, argument),
            });
        }
        let item = Argument {
            id: ArgumentId(self.tables.allocate()),
            operation,
            argument,
            order,
        };
        self.tables.arguments.insert(item.id, item);
        Ok(item)
    }

    fn list_arguments(&self, oss: OssId) -> Result<Vec<Argument>, StorageError> {
        self.require_oss(oss)?;
        let operations = self.tables.operations_of(oss);
        let mut items: Vec<Argument> = self
            .tables
            .arguments
            .values()
            .filter(|arg| operations.contains(&arg.operation))
            .copied()
            .collect();
        items.sort_by_key(|arg| (arg.operation, arg.order, arg.id));
        Ok(items)
    }

    fn delete_argument(&mut self, id: ArgumentId) -> Result<(), StorageError> {
        self.tables
            .arguments
            .shift_remove(&id)
            .ok_or(StorageError::ArgumentNotFound(id.0))?;
        Ok(())
    }

    fn create_substitution(
        &mut self,
        operation: OperationId,
        original: ConstituentId,
        substitution: ConstituentId,
    ) -> Result<Substitution, StorageError> {
        self.require_operation(operation)?;
        self.require_constituent(original)?;
        self.require_constituent(substitution)?;
        let item = Substitution {
            id: SubstitutionId(self.tables.allocate()),
            operation,
            original,
            substitution,
        };
        self.tables.substitutions.insert(item.id, item);
        Ok(item)
    }

    fn list_substitutions(&self, oss: OssId) -> Result<Vec<Substitution>, StorageError> {
        self.require_oss(oss)?;
        let operations = self.tables.operations_of(oss);
        Ok(self
            .tables
            .substitutions
            .values()
            .filter(|sub| operations.contains(&sub.operation))
            .copied()
            .collect())
    }

    fn update_substitution(&mut self, item: &Substitution) -> Result<(), StorageError> {
        self.require_constituent(item.original)?;
        self.require_constituent(item.substitution)?;
        let stored = self
            .tables
            .substitutions
            .get_mut(&item.id)
            .ok_or(StorageError::SubstitutionNotFound(item.id.0))?;
        *stored = *item;
        Ok(())
    }

    fn delete_substitution(&mut self, id: SubstitutionId) -> Result<(), StorageError> {
        self.tables
            .substitutions
            .shift_remove(&id)
            .ok_or(StorageError::SubstitutionNotFound(id.0))?;
        Ok(())
    }

    fn create_inheritance(
        &mut self,
        operation: OperationId,
        links: &[(ConstituentId, ConstituentId)],
    ) -> Result<Vec<Inheritance>, StorageError> {
        self.require_operation(operation)?;
        for (parent, child) in links {
            self.require_constituent(*parent)?;
            self.require_constituent(*child)?;
        }
        let mut created = Vec::with_capacity(links.len());
        for &(parent, child) in links {
            let item = Inheritance {
                id: InheritanceId(self.tables.allocate()),
                operation,
                parent,
                child,
            };
            self.tables.inheritance.insert(item.id, item);
            created.push(item);
        }
        Ok(created)
    }

    fn list_inheritance(&self, oss: OssId) -> Result<Vec<Inheritance>, StorageError> {
        self.require_oss(oss)?;
        let operations = self.tables.operations_of(oss);
        Ok(self
            .tables
            .inheritance
            .values()
            .filter(|link| operations.contains(&link.operation))
            .copied()
            .collect())
    }

    fn update_inheritance(&mut self, item: &Inheritance) -> Result<(), StorageError> {
        self.require_constituent(item.parent)?;
        self.require_constituent(item.child)?;
        let stored = self
            .tables
            .inheritance
            .get_mut(&item.id)
            .ok_or(StorageError::InheritanceNotFound(item.id.0))?;
        *stored = *item;
        Ok(())
    }

    fn delete_inheritance(&mut self, id: InheritanceId) -> Result<(), StorageError> {
        self.tables
            .inheritance
            .shift_remove(&id)
            .ok_or(StorageError::InheritanceNotFound(id.0))?;
        Ok(())
    }
}
