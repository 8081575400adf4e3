//! Per-session cache of one operation schema.
//!
//! [`OssCache`] holds the operations, the argument graph, the schema views
//! touched by a cascade and the substitution and inheritance records of
//! every operation. It is the single source of truth for link lookups during
//! a session: every record the engine creates, rewrites or deletes in the
//! store is mirrored here.
//!
//! Link lookups are exposed through the narrow [`LinkIndex`] trait so that
//! the translation helpers in [`crate::mapping`] do not depend on the cache
//! layout.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use cstform_core::id::{ConstituentId, InheritanceId, OperationId, SchemaId, SubstitutionId};
use cstform_core::{
    Argument, DirectedGraph, Inheritance, Operation, Oss, OssId, Substitution, TextResolver,
};
use cstform_storage::{OssStore, StorageError};

use crate::schema_view::SchemaView;

/// Read access to the substitution and inheritance records of operations.
pub trait LinkIndex {
    /// Substitutions declared by `operation`.
    fn substitutions(&self, operation: OperationId) -> &[Substitution];

    /// Inheritance records created for `operation`.
    fn inheritance(&self, operation: OperationId) -> &[Inheritance];

    /// The direct copy of `parent` in the result of `operation`.
    fn inheritor(&self, parent: ConstituentId, operation: OperationId) -> Option<ConstituentId> {
        self.inheritance(operation)
            .iter()
            .find(|link| link.parent == parent)
            .map(|link| link.child)
    }

    /// The substitution that replaced `original` in `operation`, if any.
    fn substitution_for(
        &self,
        original: ConstituentId,
        operation: OperationId,
    ) -> Option<&Substitution> {
        self.substitutions(operation)
            .iter()
            .find(|sub| sub.original == original)
    }

    /// The counterpart of `parent` in the result of `operation`: its own
    /// copy, or the copy of whatever replaced it.
    fn successor(&self, parent: ConstituentId, operation: OperationId) -> Option<ConstituentId> {
        match self.substitution_for(parent, operation) {
            Some(sub) => self.inheritor(sub.substitution, operation),
            None => self.inheritor(parent, operation),
        }
    }

    /// Direct copies of `parents`, skipping the ones without a copy.
    fn inheritors(&self, parents: &[ConstituentId], operation: OperationId) -> Vec<ConstituentId> {
        parents
            .iter()
            .filter_map(|parent| self.inheritor(*parent, operation))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Links {
    substitutions: HashMap<OperationId, Vec<Substitution>>,
    inheritance: HashMap<OperationId, Vec<Inheritance>>,
}

/// Cached state of one operation schema for the duration of a session.
pub struct OssCache {
    oss: Oss,
    operations: IndexMap<OperationId, Operation>,
    arguments: Vec<Argument>,
    /// Edges `argument -> operation`.
    graph: DirectedGraph<OperationId>,
    by_schema: HashMap<SchemaId, OperationId>,
    views: HashMap<SchemaId, SchemaView>,
    links: Option<Links>,
    resolver: Arc<dyn TextResolver>,
}

impl OssCache {
    /// Loads operations and arguments. Link records are loaded on demand by
    /// [`ensure_loaded`](OssCache::ensure_loaded).
    pub fn load(
        store: &dyn OssStore,
        oss: OssId,
        resolver: Arc<dyn TextResolver>,
    ) -> Result<Self, StorageError> {
        let oss = store.get_oss(oss)?;
        let operations: IndexMap<OperationId, Operation> = store
            .list_operations(oss.id)?
            .into_iter()
            .map(|op| (op.id, op))
            .collect();
        let arguments = store.list_arguments(oss.id)?;

        let mut graph = DirectedGraph::new();
        for id in operations.keys() {
            graph.add_node(*id);
        }
        for arg in &arguments {
            graph.add_edge(arg.argument, arg.operation);
        }
        let by_schema = operations
            .values()
            .filter_map(|op| op.result.map(|schema| (schema, op.id)))
            .collect();

        tracing::debug!(
            "loaded operation schema {} ({} operations, {} arguments)",
            oss.id,
            operations.len(),
            arguments.len()
        );
        Ok(OssCache {
            oss,
            operations,
            arguments,
            graph,
            by_schema,
            views: HashMap::new(),
            links: None,
            resolver,
        })
    }

    /// Loads substitution and inheritance records if not loaded yet.
    pub fn ensure_loaded(&mut self, store: &dyn OssStore) -> Result<(), StorageError> {
        if self.links.is_some() {
            return Ok(());
        }
        let mut links = Links::default();
        for sub in store.list_substitutions(self.oss.id)? {
            links.substitutions.entry(sub.operation).or_default().push(sub);
        }
        for link in store.list_inheritance(self.oss.id)? {
            links.inheritance.entry(link.operation).or_default().push(link);
        }
        self.links = Some(links);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------

    pub fn oss(&self) -> &Oss {
        &self.oss
    }

    pub fn resolver(&self) -> Arc<dyn TextResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn graph(&self) -> &DirectedGraph<OperationId> {
        &self.graph
    }

    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(&id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> + '_ {
        self.operations.values()
    }

    /// The operation whose result is `schema`.
    pub fn operation_for_schema(&self, schema: SchemaId) -> Option<OperationId> {
        self.by_schema.get(&schema).copied()
    }

    /// Operations that take `operation` as an argument, in creation order.
    pub fn children(&self, operation: OperationId) -> Vec<OperationId> {
        if !self.graph.contains(operation) {
            return Vec::new();
        }
        let mut children = self.graph.outputs(operation);
        children.sort();
        children
    }

    /// Arguments of `operation` in argument order.
    pub fn arguments_of(&self, operation: OperationId) -> Vec<OperationId> {
        let mut args: Vec<&Argument> = self
            .arguments
            .iter()
            .filter(|arg| arg.operation == operation)
            .collect();
        args.sort_by_key(|arg| arg.order);
        args.into_iter().map(|arg| arg.argument).collect()
    }

    pub fn schema_of(&self, operation: OperationId) -> Option<SchemaId> {
        self.operations.get(&operation).and_then(|op| op.result)
    }

    pub fn insert_operation(&mut self, operation: Operation) {
        if let Some(schema) = operation.result {
            self.by_schema.insert(schema, operation.id);
        }
        self.graph.add_node(operation.id);
        self.operations.insert(operation.id, operation);
    }

    pub fn remove_operation(&mut self, id: OperationId) {
        let Some(operation) = self.operations.shift_remove(&id) else {
            return;
        };
        if let Some(schema) = operation.result {
            self.by_schema.remove(&schema);
        }
        self.graph.remove_node(id);
        self.arguments
            .retain(|arg| arg.operation != id && arg.argument != id);
        if let Some(links) = &mut self.links {
            links.substitutions.remove(&id);
            links.inheritance.remove(&id);
        }
    }

    pub fn insert_argument(&mut self, argument: Argument) {
        self.graph.add_edge(argument.argument, argument.operation);
        self.arguments.push(argument);
    }

    pub fn remove_argument(&mut self, operation: OperationId, argument: OperationId) {
        self.graph.remove_edge(argument, operation);
        self.arguments
            .retain(|arg| !(arg.operation == operation && arg.argument == argument));
    }

    /// Binds (or unbinds) the result schema of an operation.
    pub fn set_result(&mut self, operation: OperationId, result: Option<SchemaId>) {
        let Some(op) = self.operations.get_mut(&operation) else {
            return;
        };
        if let Some(old) = op.result.take() {
            self.by_schema.remove(&old);
        }
        op.result = result;
        if let Some(schema) = result {
            self.by_schema.insert(schema, operation);
        }
    }

    // -------------------------------------------------------------------
    // Schema views
    // -------------------------------------------------------------------

    /// Loads the view of `schema` unless it is cached already.
    pub fn ensure_view(&mut self, store: &dyn OssStore, schema: SchemaId) -> Result<(), StorageError> {
        if !self.views.contains_key(&schema) {
            let view = SchemaView::load(store, schema, Arc::clone(&self.resolver))?;
            self.views.insert(schema, view);
        }
        Ok(())
    }

    pub fn view(&self, schema: SchemaId) -> Result<&SchemaView, StorageError> {
        self.views
            .get(&schema)
            .ok_or(StorageError::SchemaNotFound(schema.0))
    }

    pub fn view_mut(&mut self, schema: SchemaId) -> Result<&mut SchemaView, StorageError> {
        self.views
            .get_mut(&schema)
            .ok_or(StorageError::SchemaNotFound(schema.0))
    }

    /// Installs an already loaded view, replacing a cached one.
    pub fn insert_view(&mut self, view: SchemaView) {
        self.views.insert(view.id(), view);
    }

    pub fn remove_view(&mut self, schema: SchemaId) -> Option<SchemaView> {
        self.views.remove(&schema)
    }

    // -------------------------------------------------------------------
    // Link records
    // -------------------------------------------------------------------

    pub fn insert_substitution(&mut self, item: Substitution) {
        if let Some(links) = &mut self.links {
            links.substitutions.entry(item.operation).or_default().push(item);
        }
    }

    pub fn remove_substitution(&mut self, operation: OperationId, id: SubstitutionId) {
        if let Some(list) = self
            .links
            .as_mut()
            .and_then(|links| links.substitutions.get_mut(&operation))
        {
            list.retain(|sub| sub.id != id);
        }
    }

    pub fn replace_substitution(&mut self, item: Substitution) {
        if let Some(list) = self
            .links
            .as_mut()
            .and_then(|links| links.substitutions.get_mut(&item.operation))
        {
            if let Some(slot) = list.iter_mut().find(|sub| sub.id == item.id) {
                *slot = item;
            }
        }
    }

    pub fn insert_inheritance(&mut self, item: Inheritance) {
        if let Some(links) = &mut self.links {
            links.inheritance.entry(item.operation).or_default().push(item);
        }
    }

    pub fn remove_inheritance(&mut self, operation: OperationId, id: InheritanceId) {
        if let Some(list) = self
            .links
            .as_mut()
            .and_then(|links| links.inheritance.get_mut(&operation))
        {
            list.retain(|link| link.id != id);
        }
    }

    pub fn replace_inheritance(&mut self, item: Inheritance) {
        if let Some(list) = self
            .links
            .as_mut()
            .and_then(|links| links.inheritance.get_mut(&item.operation))
        {
            if let Some(slot) = list.iter_mut().find(|link| link.id == item.id) {
                *slot = item;
            }
        }
    }

    /// Drops every cached record that names one of `ids`, mirroring the
    /// storage cascade of a constituent delete.
    pub fn forget_constituents(&mut self, ids: &[ConstituentId]) {
        let Some(links) = &mut self.links else {
            return;
        };
        for list in links.substitutions.values_mut() {
            list.retain(|sub| !ids.contains(&sub.original) && !ids.contains(&sub.substitution));
        }
        for list in links.inheritance.values_mut() {
            list.retain(|link| !ids.contains(&link.parent) && !ids.contains(&link.child));
        }
    }
}

impl LinkIndex for OssCache {
    fn substitutions(&self, operation: OperationId) -> &[Substitution] {
        self.links
            .as_ref()
            .and_then(|links| links.substitutions.get(&operation))
            .map_or(&[], Vec::as_slice)
    }

    fn inheritance(&self, operation: OperationId) -> &[Inheritance] {
        self.links
            .as_ref()
            .and_then(|links| links.inheritance.get(&operation))
            .map_or(&[], Vec::as_slice)
    }
}
