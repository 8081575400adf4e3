//! Entry points called by the code that edits schemas.
//!
//! Schema-level hooks find every operation whose result is the edited schema
//! (across operation schemas) and run one engine session per host. The
//! `after_*` hooks expect the local edit to be applied already; the
//! `before_*` hooks must run before it. None of them commit: wrap the local
//! edit and the hook in [`atomic`].

use std::sync::Arc;

use indexmap::IndexMap;

use cstform_core::id::{ConstituentId, OperationId, OssId, SchemaId};
use cstform_core::{Constituent, CstType, CstUpdate, EntityReferenceResolver, Schema, TextResolver};
use cstform_storage::{OssStore, StorageError};

use crate::cache::OssCache;
use crate::engine::PropagationEngine;
use crate::error::PropagationError;
use crate::mapping::{update_references, DependencyMapping};
use crate::schema_view::SchemaView;

/// Runs `f` inside a store transaction: commits on `Ok`, rolls back on
/// `Err` and returns the original error.
pub fn atomic<S, T, F>(store: &mut S, f: F) -> Result<T, PropagationError>
where
    S: OssStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T, PropagationError>,
{
    store.begin()?;
    tracing::info!("propagation session started");
    match f(store) {
        Ok(value) => {
            store.commit()?;
            tracing::info!("propagation session committed");
            Ok(value)
        }
        Err(err) => {
            match store.rollback() {
                Ok(()) => tracing::warn!("propagation session rolled back: {}", err),
                Err(rollback) => tracing::warn!("rollback failed after {}: {}", err, rollback),
            }
            Err(err)
        }
    }
}

/// Stateless propagation front end; every call loads fresh caches.
#[derive(Clone)]
pub struct PropagationFacade {
    resolver: Arc<dyn TextResolver>,
}

impl Default for PropagationFacade {
    fn default() -> Self {
        PropagationFacade::new(Arc::new(EntityReferenceResolver))
    }
}

impl PropagationFacade {
    pub fn new(resolver: Arc<dyn TextResolver>) -> Self {
        PropagationFacade { resolver }
    }

    pub fn resolver(&self) -> Arc<dyn TextResolver> {
        Arc::clone(&self.resolver)
    }

    /// Loads a view of `schema` using this facade's resolver.
    pub fn load_view(
        &self,
        store: &dyn OssStore,
        schema: SchemaId,
    ) -> Result<SchemaView, StorageError> {
        SchemaView::load(store, schema, self.resolver())
    }

    /// Runs `step` once per operation that has `source` as its result.
    fn for_each_host<F>(
        &self,
        store: &mut dyn OssStore,
        source: &SchemaView,
        mut step: F,
    ) -> Result<(), PropagationError>
    where
        F: FnMut(&mut PropagationEngine<'_>, OperationId) -> Result<(), PropagationError>,
    {
        let mut hosts: IndexMap<OssId, Vec<OperationId>> = IndexMap::new();
        for operation in store.find_operations_by_result(source.id())? {
            hosts.entry(operation.oss).or_default().push(operation.id);
        }
        for (oss, operations) in hosts {
            let mut cache = OssCache::load(&*store, oss, self.resolver())?;
            cache.insert_view(source.clone());
            let mut engine = PropagationEngine::new(&mut *store, cache)?;
            for operation in operations {
                tracing::debug!("propagating schema {} through operation {}", source.id(), operation);
                step(&mut engine, operation)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Schema-level hooks
    // -------------------------------------------------------------------

    /// Propagates newly created `items` of `source`.
    pub fn after_create(
        &self,
        store: &mut dyn OssStore,
        source: &SchemaView,
        items: &[Constituent],
    ) -> Result<(), PropagationError> {
        if items.is_empty() {
            return Ok(());
        }
        let ids: Vec<ConstituentId> = items.iter().map(|cst| cst.id).collect();
        let mapping = source.dependency_mapping(&ids);
        self.for_each_host(store, source, |engine, operation| {
            engine.on_create(operation, source.id(), &ids, &mapping)
        })
    }

    /// Propagates a change of kind of `id` in `source`.
    pub fn after_retype(
        &self,
        store: &mut dyn OssStore,
        source: &SchemaView,
        id: ConstituentId,
        kind: CstType,
    ) -> Result<(), PropagationError> {
        self.for_each_host(store, source, |engine, operation| {
            engine.on_retype(operation, id, kind)
        })
    }

    /// Propagates an update of `id`.
    ///
    /// `old_data` holds the previous values of the fields in `new_data`;
    /// fields that did not change are not propagated.
    pub fn after_update(
        &self,
        store: &mut dyn OssStore,
        source: &SchemaView,
        id: ConstituentId,
        new_data: &CstUpdate,
        old_data: &CstUpdate,
    ) -> Result<(), PropagationError> {
        let mut data = new_data.clone();
        data.retain_fields_of(old_data);
        if data.is_empty() {
            return Ok(());
        }
        let references = update_references(&data, old_data, source.resolver());
        let mapping: DependencyMapping = source.mapping_for_aliases(references);
        self.for_each_host(store, source, |engine, operation| {
            engine.on_update(operation, id, &data, old_data, &mapping)
        })
    }

    /// Deletes the downstream copies of `ids` before they are deleted from
    /// `source`.
    pub fn before_delete(
        &self,
        store: &mut dyn OssStore,
        source: &SchemaView,
        ids: &[ConstituentId],
    ) -> Result<(), PropagationError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.for_each_host(store, source, |engine, operation| {
            engine.on_delete(operation, ids)
        })
    }

    /// Identifies the downstream copies of each `(original, substitution)`
    /// pair before `source` substitutes them.
    pub fn before_substitute(
        &self,
        store: &mut dyn OssStore,
        source: &SchemaView,
        pairs: &[(ConstituentId, ConstituentId)],
    ) -> Result<(), PropagationError> {
        if pairs.is_empty() {
            return Ok(());
        }
        self.for_each_host(store, source, |engine, operation| {
            engine.on_substitute(operation, pairs)
        })
    }

    // -------------------------------------------------------------------
    // Operation-level entry points
    // -------------------------------------------------------------------

    fn engine<'s>(
        &self,
        store: &'s mut dyn OssStore,
        oss: OssId,
    ) -> Result<PropagationEngine<'s>, PropagationError> {
        let cache = OssCache::load(&*store, oss, self.resolver())?;
        PropagationEngine::new(store, cache)
    }

    /// Creates the result schema of a synthesis operation.
    pub fn execute_operation(
        &self,
        store: &mut dyn OssStore,
        oss: OssId,
        operation: OperationId,
    ) -> Result<Schema, PropagationError> {
        self.engine(store, oss)?.execute_operation(operation)
    }

    /// Inherits the schemas of freshly added arguments of `operation`.
    pub fn after_create_arguments(
        &self,
        store: &mut dyn OssStore,
        oss: OssId,
        operation: OperationId,
        operands: &[OperationId],
    ) -> Result<(), PropagationError> {
        self.engine(store, oss)?
            .after_create_arguments(operation, operands)
    }

    /// Removes what `operation` inherited from arguments about to be removed.
    pub fn before_delete_arguments(
        &self,
        store: &mut dyn OssStore,
        oss: OssId,
        operation: OperationId,
        operands: &[OperationId],
    ) -> Result<(), PropagationError> {
        self.engine(store, oss)?
            .before_delete_arguments(operation, operands)
    }

    /// Rebinds an input operation.
    pub fn set_input(
        &self,
        store: &mut dyn OssStore,
        oss: OssId,
        operation: OperationId,
        schema: Option<SchemaId>,
    ) -> Result<(), PropagationError> {
        self.engine(store, oss)?.set_input(operation, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstform_storage::InMemoryStore;

    #[test]
    fn test_atomic_commits_on_success() {
        let mut store = InMemoryStore::new();
        let schema = atomic(&mut store, |store| Ok(store.create_schema("S1", "")?)).unwrap();
        assert!(!store.in_transaction());
        assert_eq!(store.get_schema(schema.id).unwrap().alias, "S1");
    }

    #[test]
    fn test_atomic_rolls_back_on_error() {
        let mut store = InMemoryStore::new();
        let result: Result<(), PropagationError> = atomic(&mut store, |store| {
            store.create_schema("S1", "")?;
            Err(PropagationError::UnknownOperation(OperationId(7)))
        });
        assert!(matches!(result, Err(PropagationError::UnknownOperation(_))));
        assert!(!store.in_transaction());
        assert!(store.list_schemas().unwrap().is_empty());
    }

    #[test]
    fn test_hooks_without_hosts_are_noops() {
        let mut store = InMemoryStore::new();
        let facade = PropagationFacade::default();
        let schema = store.create_schema("S1", "").unwrap();
        let view = facade.load_view(&store, schema.id).unwrap();
        facade
            .before_delete(&mut store, &view, &[ConstituentId(99)])
            .unwrap();
        facade
            .after_retype(&mut store, &view, ConstituentId(99), CstType::Term)
            .unwrap();
    }
}
