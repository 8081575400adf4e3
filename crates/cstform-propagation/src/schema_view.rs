//! [`SchemaView`]: an in-memory, write-through view of one schema.
//!
//! The view holds the schema's constituents in order together with an
//! alias index, and keeps both in sync with every mutation so a cascade
//! never has to re-read the schema from storage. Each mutating method
//! applies its change in memory, collects the touched constituents in a
//! [`PendingWrites`] accumulator and flushes them with one bulk
//! `update_constituents` call.
//!
//! Orders are 0-based and dense after every mutation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use cstform_core::id::{ConstituentId, SchemaId};
use cstform_core::text::extract_globals;
use cstform_core::{
    make_alias, parse_alias, AliasMapping, Constituent, ConstituentDraft, CoreError, CstType,
    CstUpdate, DirectedGraph, Schema, TermContext, TextResolver, DELETED_ALIAS,
};
use cstform_storage::{OssStore, StorageError};

use crate::error::PropagationError;
use crate::mapping::DependencyMapping;

/// Constituents touched by one mutation, written back in a single call.
#[derive(Debug, Default)]
struct PendingWrites {
    touched: IndexSet<ConstituentId>,
}

impl PendingWrites {
    fn touch(&mut self, id: ConstituentId) {
        self.touched.insert(id);
    }

    fn flush(self, view: &SchemaView, store: &mut dyn OssStore) -> Result<(), StorageError> {
        let items: Vec<Constituent> = self
            .touched
            .iter()
            .filter_map(|id| view.items.get(id).cloned())
            .collect();
        if items.is_empty() {
            return Ok(());
        }
        store.update_constituents(&items)
    }
}

/// Ordered, indexed view of one schema's constituents.
#[derive(Clone)]
pub struct SchemaView {
    schema: Schema,
    /// Constituents keyed by id, in schema order.
    items: IndexMap<ConstituentId, Constituent>,
    by_alias: HashMap<String, ConstituentId>,
    resolver: Arc<dyn TextResolver>,
}

impl fmt::Debug for SchemaView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaView")
            .field("schema", &self.schema)
            .field("items", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl SchemaView {
    /// Loads a schema and its constituents from storage.
    pub fn load(
        store: &dyn OssStore,
        schema: SchemaId,
        resolver: Arc<dyn TextResolver>,
    ) -> Result<Self, StorageError> {
        let schema = store.get_schema(schema)?;
        let items = store.load_constituents(schema.id)?;
        Ok(Self::from_parts(schema, items, resolver))
    }

    /// Builds a view from already loaded, order-sorted constituents.
    pub fn from_parts(
        schema: Schema,
        items: Vec<Constituent>,
        resolver: Arc<dyn TextResolver>,
    ) -> Self {
        let by_alias = items
            .iter()
            .map(|cst| (cst.alias.clone(), cst.id))
            .collect();
        let items = items.into_iter().map(|cst| (cst.id, cst)).collect();
        SchemaView {
            schema,
            items,
            by_alias,
            resolver,
        }
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    pub fn id(&self) -> SchemaId {
        self.schema.id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn resolver(&self) -> &dyn TextResolver {
        &*self.resolver
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: ConstituentId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn get(&self, id: ConstituentId) -> Option<&Constituent> {
        self.items.get(&id)
    }

    pub fn by_alias(&self, alias: &str) -> Option<&Constituent> {
        self.by_alias.get(alias).and_then(|id| self.items.get(id))
    }

    /// 0-based position of a constituent in schema order.
    pub fn position(&self, id: ConstituentId) -> Option<usize> {
        self.items.get_index_of(&id)
    }

    pub fn at(&self, index: usize) -> Option<&Constituent> {
        self.items.get_index(index).map(|(_, cst)| cst)
    }

    /// Constituents in schema order.
    pub fn items(&self) -> impl Iterator<Item = &Constituent> + '_ {
        self.items.values()
    }

    pub fn ids(&self) -> Vec<ConstituentId> {
        self.items.keys().copied().collect()
    }

    /// Next unused alias for `kind`: one past the highest index in use.
    pub fn next_alias(&self, kind: CstType) -> String {
        make_alias(kind, self.max_index(kind) + 1)
    }

    fn max_index(&self, kind: CstType) -> u32 {
        self.items
            .values()
            .filter_map(|cst| parse_alias(&cst.alias).ok())
            .filter(|(cst_type, _)| *cst_type == kind)
            .map(|(_, index)| index)
            .max()
            .unwrap_or(0)
    }

    /// Alias -> resolved term, the context for text resolution.
    pub fn term_context(&self) -> TermContext {
        self.items
            .values()
            .map(|cst| (cst.alias.clone(), cst.term_resolved.clone()))
            .collect()
    }

    fn require(&self, id: ConstituentId) -> Result<&Constituent, PropagationError> {
        self.items
            .get(&id)
            .ok_or(PropagationError::ConstituentNotInSchema {
                constituent: id,
                schema: self.schema.id,
            })
    }

    /// Aliases referenced by `ids` (formal and raw text), excluding their
    /// own aliases, mapped to the constituents they name in this schema.
    /// Aliases that name nothing here are left out.
    pub fn dependency_mapping(&self, ids: &[ConstituentId]) -> DependencyMapping {
        let own: HashSet<&str> = ids
            .iter()
            .filter_map(|id| self.items.get(id))
            .map(|cst| cst.alias.as_str())
            .collect();
        let mut result = DependencyMapping::new();
        for cst in ids.iter().filter_map(|id| self.items.get(id)) {
            for alias in cst.references(&*self.resolver) {
                if own.contains(alias.as_str()) {
                    continue;
                }
                if let Some(target) = self.by_alias.get(&alias) {
                    result.insert(alias, Some(*target));
                }
            }
        }
        result
    }

    /// Looks up each alias in this schema, keeping only the ones that exist.
    pub fn mapping_for_aliases(
        &self,
        aliases: impl IntoIterator<Item = String>,
    ) -> DependencyMapping {
        aliases
            .into_iter()
            .filter_map(|alias| {
                let target = *self.by_alias.get(&alias)?;
                Some((alias, Some(target)))
            })
            .collect()
    }

    // -------------------------------------------------------------------
    // Reference graphs
    // -------------------------------------------------------------------

    fn build_graph<F>(&self, references: F) -> DirectedGraph<ConstituentId>
    where
        F: Fn(&Constituent) -> IndexSet<String>,
    {
        let mut graph = DirectedGraph::new();
        for cst in self.items.values() {
            graph.add_node(cst.id);
        }
        for cst in self.items.values() {
            for alias in references(cst) {
                if let Some(&source) = self.by_alias.get(&alias) {
                    if source != cst.id {
                        graph.add_edge(source, cst.id);
                    }
                }
            }
        }
        graph
    }

    /// Edges `referenced -> referencing` through formal expressions.
    pub fn formal_graph(&self) -> DirectedGraph<ConstituentId> {
        self.build_graph(|cst| extract_globals(&cst.definition_formal))
    }

    /// Edges `referenced -> referencing` through raw terms.
    pub fn term_graph(&self) -> DirectedGraph<ConstituentId> {
        self.build_graph(|cst| self.resolver.extract_references(&cst.term_raw))
    }

    /// Edges `referenced -> referencing` through raw definitions.
    pub fn text_graph(&self) -> DirectedGraph<ConstituentId> {
        self.build_graph(|cst| self.resolver.extract_references(&cst.definition_raw))
    }

    /// Constituents that reference any of `ids` directly, through any text.
    pub fn dependants(&self, ids: &[ConstituentId]) -> Vec<ConstituentId> {
        let graph = self.build_graph(|cst| cst.references(&*self.resolver));
        let mut result = IndexSet::new();
        for id in ids {
            if graph.contains(*id) {
                result.extend(graph.outputs(*id));
            }
        }
        result.into_iter().collect()
    }

    // -------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------

    fn rebuild_alias_index(&mut self) {
        self.by_alias = self
            .items
            .values()
            .map(|cst| (cst.alias.clone(), cst.id))
            .collect();
    }

    fn renumber(&mut self, pending: &mut PendingWrites) {
        for (index, cst) in self.items.values_mut().enumerate() {
            let order = index as u32;
            if cst.order != order {
                cst.order = order;
                pending.touch(cst.id);
            }
        }
    }

    /// Rewrites references through `mapping`, limited to `targets` if given.
    fn rewrite(
        &mut self,
        mapping: &AliasMapping,
        targets: Option<&[ConstituentId]>,
        change_aliases: bool,
        pending: &mut PendingWrites,
    ) {
        if mapping.is_empty() {
            return;
        }
        let resolver = Arc::clone(&self.resolver);
        for cst in self.items.values_mut() {
            if let Some(targets) = targets {
                if !targets.contains(&cst.id) {
                    continue;
                }
            }
            if cst.apply_mapping(mapping, &*resolver, change_aliases) {
                pending.touch(cst.id);
            }
        }
        if change_aliases {
            self.rebuild_alias_index();
        }
    }

    /// Creates a constituent at `position` (or at the end).
    ///
    /// The alias must carry the kind's prefix and be unused. Resolved texts
    /// are computed from the raw ones.
    pub fn create(
        &mut self,
        store: &mut dyn OssStore,
        draft: ConstituentDraft,
        position: Option<usize>,
    ) -> Result<Constituent, PropagationError> {
        let (kind, _) = parse_alias(&draft.alias)?;
        if kind != draft.cst_type {
            return Err(CoreError::InvalidAlias { alias: draft.alias }.into());
        }
        if self.by_alias.contains_key(&draft.alias) {
            return Err(CoreError::DuplicateAlias { alias: draft.alias }.into());
        }
        let context = self.term_context();
        let mut draft = draft;
        draft.term_resolved = self.resolver.resolve(&draft.term_raw, &context);
        draft.definition_resolved = self.resolver.resolve(&draft.definition_raw, &context);

        let position = position.map_or(self.len(), |p| p.min(self.len()));
        let created = store
            .insert_constituents(self.schema.id, position as u32, &[draft])?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::IntegrityError {
                reason: "insert returned no constituent".into(),
            })?;
        self.items.shift_insert(position, created.id, created.clone());
        self.by_alias.insert(created.alias.clone(), created.id);

        let mut pending = PendingWrites::default();
        self.renumber(&mut pending);
        pending.flush(self, store)?;
        Ok(created)
    }

    /// Copies `items` into this schema at `position` (or at the end).
    ///
    /// Every copy gets the next free alias of its kind, and all references
    /// inside the copies are rewritten through `mapping` extended with the
    /// copies' own renames. Returns the copies in input order.
    pub fn insert_copy(
        &mut self,
        store: &mut dyn OssStore,
        items: &[Constituent],
        position: Option<usize>,
        mapping: &AliasMapping,
    ) -> Result<Vec<Constituent>, PropagationError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let position = position.map_or(self.len(), |p| p.min(self.len()));

        let mut mapping = mapping.clone();
        let mut indices: HashMap<CstType, u32> = HashMap::new();
        for cst in items {
            let index = indices
                .entry(cst.cst_type)
                .or_insert_with(|| self.max_index(cst.cst_type));
            *index += 1;
            mapping.insert(cst.alias.clone(), make_alias(cst.cst_type, *index));
        }

        let drafts: Vec<ConstituentDraft> = items
            .iter()
            .map(|cst| {
                let mut copy = cst.clone();
                copy.apply_mapping(&mapping, &*self.resolver, true);
                copy.to_draft()
            })
            .collect();
        let created = store.insert_constituents(self.schema.id, position as u32, &drafts)?;
        for (offset, cst) in created.iter().enumerate() {
            self.items.shift_insert(position + offset, cst.id, cst.clone());
            self.by_alias.insert(cst.alias.clone(), cst.id);
        }

        let mut pending = PendingWrites::default();
        self.renumber(&mut pending);
        pending.flush(self, store)?;
        tracing::debug!(
            "copied {} constituent(s) into schema {} at {}",
            created.len(),
            self.schema.id,
            position
        );
        Ok(created)
    }

    /// Applies the present fields of `data`, returning the previous values
    /// of the fields that actually changed.
    ///
    /// A changed term re-resolves the terms and definitions that depend on
    /// it.
    pub fn update(
        &mut self,
        store: &mut dyn OssStore,
        id: ConstituentId,
        data: &CstUpdate,
    ) -> Result<CstUpdate, PropagationError> {
        self.require(id)?;
        let context = self.term_context();
        let resolver = Arc::clone(&self.resolver);
        let mut pending = PendingWrites::default();
        let old = match self.items.get_mut(&id) {
            Some(cst) => {
                let old = cst.apply_update(data);
                if old.term_raw.is_some() {
                    cst.term_resolved = resolver.resolve(&cst.term_raw, &context);
                }
                if old.definition_raw.is_some() {
                    cst.definition_resolved = resolver.resolve(&cst.definition_raw, &context);
                }
                old
            }
            None => CstUpdate::default(),
        };
        if old.is_empty() {
            return Ok(old);
        }
        pending.touch(id);
        if old.touches_term() {
            self.on_term_change(&[id], &mut pending);
        }
        pending.flush(self, store)?;
        Ok(old)
    }

    /// Re-resolves everything downstream of changed terms.
    fn on_term_change(&mut self, changed: &[ConstituentId], pending: &mut PendingWrites) {
        let resolver = Arc::clone(&self.resolver);
        let terms = self.term_graph();
        let expansion = terms.expand_outputs(changed);
        let mut context = self.term_context();
        for id in terms.topological_order() {
            if !expansion.contains(&id) {
                continue;
            }
            let Some(cst) = self.items.get_mut(&id) else {
                continue;
            };
            let resolved = resolver.resolve(&cst.term_raw, &context);
            if resolved == cst.term_resolved {
                continue;
            }
            cst.term_resolved = resolved.clone();
            cst.term_forms.clear();
            context.insert(cst.alias.clone(), resolved);
            pending.touch(id);
        }

        let mut seeds: Vec<ConstituentId> = changed.to_vec();
        seeds.extend(expansion.iter().copied());
        let mut definitions: IndexSet<ConstituentId> = seeds.iter().copied().collect();
        definitions.extend(self.text_graph().expand_outputs(&seeds));
        for id in definitions {
            let Some(cst) = self.items.get_mut(&id) else {
                continue;
            };
            let resolved = resolver.resolve(&cst.definition_raw, &context);
            if resolved != cst.definition_resolved {
                cst.definition_resolved = resolved;
                pending.touch(id);
            }
        }
    }

    /// Resolves every term (in reference order) and every definition.
    pub fn resolve_all_text(&mut self, store: &mut dyn OssStore) -> Result<(), StorageError> {
        let resolver = Arc::clone(&self.resolver);
        let terms = self.term_graph();
        let mut context = TermContext::new();
        let mut pending = PendingWrites::default();
        for id in terms.topological_order() {
            let Some(cst) = self.items.get_mut(&id) else {
                continue;
            };
            let resolved = resolver.resolve(&cst.term_raw, &context);
            if resolved != cst.term_resolved {
                cst.term_resolved = resolved;
                pending.touch(id);
            }
            context.insert(cst.alias.clone(), cst.term_resolved.clone());
        }
        for cst in self.items.values_mut() {
            let resolved = resolver.resolve(&cst.definition_raw, &context);
            if resolved != cst.definition_resolved {
                cst.definition_resolved = resolved;
                pending.touch(cst.id);
            }
        }
        pending.flush(self, store)
    }

    /// Changes the kind of a constituent, giving it the next free alias of
    /// the new kind and rewriting references to it.
    ///
    /// Returns `false` if the kind was already `kind`.
    pub fn change_type(
        &mut self,
        store: &mut dyn OssStore,
        id: ConstituentId,
        kind: CstType,
    ) -> Result<bool, PropagationError> {
        let current = self.require(id)?;
        if current.cst_type == kind {
            return Ok(false);
        }
        let old_alias = current.alias.clone();
        let new_alias = self.next_alias(kind);
        if let Some(cst) = self.items.get_mut(&id) {
            cst.cst_type = kind;
            cst.alias = new_alias.clone();
        }
        self.by_alias.remove(&old_alias);
        self.by_alias.insert(new_alias.clone(), id);

        let mut pending = PendingWrites::default();
        pending.touch(id);
        let mapping = AliasMapping::from([(old_alias, new_alias)]);
        self.rewrite(&mapping, None, false, &mut pending);
        pending.flush(self, store)?;
        Ok(true)
    }

    /// Deletes constituents. References to them become `DELETED`.
    pub fn delete(
        &mut self,
        store: &mut dyn OssStore,
        ids: &[ConstituentId],
    ) -> Result<(), PropagationError> {
        let ids: IndexSet<ConstituentId> = ids.iter().copied().collect();
        let ids: Vec<ConstituentId> = ids.into_iter().collect();
        if ids.is_empty() {
            return Ok(());
        }
        let mut mapping = AliasMapping::new();
        for id in &ids {
            let cst = self.require(*id)?;
            mapping.insert(cst.alias.clone(), DELETED_ALIAS.to_string());
        }
        for id in &ids {
            if let Some(cst) = self.items.shift_remove(id) {
                self.by_alias.remove(&cst.alias);
            }
        }
        store.delete_constituents(&ids)?;

        let mut pending = PendingWrites::default();
        self.rewrite(&mapping, None, false, &mut pending);
        self.renumber(&mut pending);
        pending.flush(self, store)?;
        Ok(())
    }

    /// Identifies constituents: each `(original, substitution)` pair deletes
    /// the original and points its references at the substitution.
    pub fn substitute(
        &mut self,
        store: &mut dyn OssStore,
        pairs: &[(ConstituentId, ConstituentId)],
    ) -> Result<(), PropagationError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut mapping = AliasMapping::new();
        let mut deleted = Vec::with_capacity(pairs.len());
        for &(original, substitution) in pairs {
            let replacement = self.require(substitution)?.alias.clone();
            let alias = self.require(original)?.alias.clone();
            if original == substitution {
                return Err(CoreError::DuplicateAlias { alias }.into());
            }
            mapping.insert(alias, replacement);
            deleted.push(original);
        }
        for id in &deleted {
            if let Some(cst) = self.items.shift_remove(id) {
                self.by_alias.remove(&cst.alias);
            }
        }
        store.delete_constituents(&deleted)?;

        let mut pending = PendingWrites::default();
        self.rewrite(&mapping, None, false, &mut pending);
        self.renumber(&mut pending);
        pending.flush(self, store)?;
        Ok(())
    }

    /// Rewrites references (and aliases, if `change_aliases`) across the
    /// whole schema.
    pub fn apply_mapping(
        &mut self,
        store: &mut dyn OssStore,
        mapping: &AliasMapping,
        change_aliases: bool,
    ) -> Result<(), StorageError> {
        let mut pending = PendingWrites::default();
        self.rewrite(mapping, None, change_aliases, &mut pending);
        pending.flush(self, store)
    }

    /// Rewrites references inside `targets` only.
    pub fn apply_partial_mapping(
        &mut self,
        store: &mut dyn OssStore,
        mapping: &AliasMapping,
        targets: &[ConstituentId],
    ) -> Result<(), StorageError> {
        let mut pending = PendingWrites::default();
        self.rewrite(mapping, Some(targets), false, &mut pending);
        pending.flush(self, store)
    }

    /// Reorders the schema: basic sets, then constants, then the rest of the
    /// kernel (with axioms) and everything it formally depends on, then the
    /// remaining constituents; finally a stable topological sort over formal
    /// references.
    pub fn restore_order(&mut self, store: &mut dyn OssStore) -> Result<(), PropagationError> {
        let formal = self.formal_graph();
        let of_kind = |kind: CstType| -> Vec<ConstituentId> {
            self.items
                .values()
                .filter(|cst| cst.cst_type == kind)
                .map(|cst| cst.id)
                .collect()
        };
        let mut order: IndexSet<ConstituentId> = of_kind(CstType::Basic).into_iter().collect();
        order.extend(of_kind(CstType::Constant));

        let seed: Vec<ConstituentId> = self
            .items
            .values()
            .filter(|cst| cst.cst_type.is_kernel() || cst.cst_type == CstType::Axiom)
            .map(|cst| cst.id)
            .collect();
        let mut kernel: HashSet<ConstituentId> = seed.iter().copied().collect();
        kernel.extend(formal.expand_inputs(&seed));
        order.extend(self.items.keys().filter(|id| kernel.contains(id)).copied());
        order.extend(self.items.keys().copied());

        let order: Vec<ConstituentId> = order.into_iter().collect();
        let sorted = formal.sort_stable(&order)?;

        let mut reordered = IndexMap::with_capacity(self.items.len());
        for id in sorted {
            if let Some(cst) = self.items.shift_remove(&id) {
                reordered.insert(id, cst);
            }
        }
        self.items = reordered;

        let mut pending = PendingWrites::default();
        self.renumber(&mut pending);
        pending.flush(self, store)?;
        Ok(())
    }

    /// Renumbers aliases per kind following schema order (`X1, X2, ...`).
    pub fn reset_aliases(&mut self, store: &mut dyn OssStore) -> Result<(), StorageError> {
        let mut mapping = AliasMapping::new();
        for kind in CstType::ALL {
            let mut index = 0;
            for cst in self.items.values().filter(|cst| cst.cst_type == kind) {
                index += 1;
                let alias = make_alias(kind, index);
                if cst.alias != alias {
                    mapping.insert(cst.alias.clone(), alias);
                }
            }
        }
        self.apply_mapping(store, &mapping, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstform_core::{EntityReferenceResolver, TermForm};
    use cstform_storage::InMemoryStore;
    use proptest::prelude::*;

    fn resolver() -> Arc<dyn TextResolver> {
        Arc::new(EntityReferenceResolver)
    }

    fn view_with(store: &mut InMemoryStore, drafts: Vec<ConstituentDraft>) -> SchemaView {
        let schema = store.create_schema("S1", "").unwrap();
        store.insert_constituents(schema.id, 0, &drafts).unwrap();
        SchemaView::load(store, schema.id, resolver()).unwrap()
    }

    fn sample(store: &mut InMemoryStore) -> SchemaView {
        view_with(
            store,
            vec![
                ConstituentDraft::new("X1", CstType::Basic).with_term("element"),
                ConstituentDraft::new("S1", CstType::Structured).with_formal("ℬ(X1)"),
                ConstituentDraft::new("D1", CstType::Term)
                    .with_formal("Pr1(S1)")
                    .with_term("set of @{X1|plur,gent}"),
            ],
        )
    }

    fn aliases(view: &SchemaView) -> Vec<String> {
        view.items().map(|cst| cst.alias.clone()).collect()
    }

    fn assert_in_sync(view: &SchemaView, store: &InMemoryStore) {
        let stored = store.load_constituents(view.id()).unwrap();
        let held: Vec<Constituent> = view.items().cloned().collect();
        assert_eq!(stored, held);
        for (index, cst) in held.iter().enumerate() {
            assert_eq!(cst.order, index as u32);
        }
    }

    #[test]
    fn test_create_validates_alias() {
        let mut store = InMemoryStore::new();
        let mut view = sample(&mut store);

        let duplicate = view.create(&mut store, ConstituentDraft::new("X1", CstType::Basic), None);
        assert!(matches!(
            duplicate,
            Err(PropagationError::Core(CoreError::DuplicateAlias { .. }))
        ));
        let wrong_prefix =
            view.create(&mut store, ConstituentDraft::new("X2", CstType::Term), None);
        assert!(matches!(
            wrong_prefix,
            Err(PropagationError::Core(CoreError::InvalidAlias { .. }))
        ));
    }

    #[test]
    fn test_create_at_position_resolves_term() {
        let mut store = InMemoryStore::new();
        let mut view = sample(&mut store);
        let created = view
            .create(
                &mut store,
                ConstituentDraft::new("D2", CstType::Term).with_term("copy of @{X1|sing}"),
                Some(1),
            )
            .unwrap();
        assert_eq!(created.term_resolved, "copy of element");
        assert_eq!(aliases(&view), vec!["X1", "D2", "S1", "D1"]);
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_insert_copy_renames_and_maps() {
        let mut store = InMemoryStore::new();
        let mut source_store = InMemoryStore::new();
        let source = sample(&mut source_store);
        let mut view = view_with(
            &mut store,
            vec![
                ConstituentDraft::new("X1", CstType::Basic),
                ConstituentDraft::new("X2", CstType::Basic),
            ],
        );
        let items: Vec<Constituent> = source.items().skip(1).cloned().collect();
        let mapping = AliasMapping::from([("X1".to_string(), "X2".to_string())]);

        let copies = view.insert_copy(&mut store, &items, Some(1), &mapping).unwrap();
        assert_eq!(copies[0].alias, "S1");
        assert_eq!(copies[0].definition_formal, "ℬ(X2)");
        assert_eq!(copies[1].alias, "D1");
        assert_eq!(copies[1].definition_formal, "Pr1(S1)");
        assert_eq!(copies[1].term_raw, "set of @{X2|plur,gent}");
        assert_eq!(aliases(&view), vec!["X1", "S1", "D1", "X2"]);
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_insert_copy_avoids_alias_collisions() {
        let mut store = InMemoryStore::new();
        let mut view = sample(&mut store);
        let items: Vec<Constituent> = view.items().cloned().collect();
        let copies = view
            .insert_copy(&mut store, &items, None, &AliasMapping::new())
            .unwrap();
        let copied: Vec<&str> = copies.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(copied, vec!["X2", "S2", "D2"]);
        assert_eq!(copies[2].definition_formal, "Pr1(S2)");
        assert_eq!(copies[2].term_raw, "set of @{X2|plur,gent}");
    }

    #[test]
    fn test_update_returns_previous_values() {
        let mut store = InMemoryStore::new();
        let mut view = sample(&mut store);
        let d1 = view.by_alias("D1").unwrap().id;
        let data = CstUpdate {
            definition_formal: Some("Pr2(S1)".into()),
            convention: Some(String::new()),
            ..Default::default()
        };
        let old = view.update(&mut store, d1, &data).unwrap();
        assert_eq!(old.definition_formal.as_deref(), Some("Pr1(S1)"));
        // Convention was already empty
        assert!(old.convention.is_none());
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_term_change_cascades_to_dependants() {
        let mut store = InMemoryStore::new();
        let mut view = view_with(
            &mut store,
            vec![
                ConstituentDraft::new("X1", CstType::Basic).with_term("element"),
                ConstituentDraft::new("D1", CstType::Term)
                    .with_term("set of @{X1|plur}")
                    .with_definition("all @{X1|plur}"),
                ConstituentDraft::new("D2", CstType::Term).with_term("family of @{D1|plur}"),
            ],
        );
        view.resolve_all_text(&mut store).unwrap();
        assert_eq!(view.by_alias("D2").unwrap().term_resolved, "family of set of element");

        let x1 = view.by_alias("X1").unwrap().id;
        let data = CstUpdate {
            term_raw: Some("point".into()),
            ..Default::default()
        };
        view.update(&mut store, x1, &data).unwrap();
        assert_eq!(view.by_alias("X1").unwrap().term_resolved, "point");
        assert_eq!(view.by_alias("D1").unwrap().term_resolved, "set of point");
        assert_eq!(view.by_alias("D1").unwrap().definition_resolved, "all point");
        assert_eq!(view.by_alias("D2").unwrap().term_resolved, "family of set of point");
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_term_change_clears_word_forms_of_dependants() {
        let mut store = InMemoryStore::new();
        let mut view = view_with(
            &mut store,
            vec![
                ConstituentDraft::new("X1", CstType::Basic).with_term("element"),
                ConstituentDraft::new("D1", CstType::Term).with_term("set of @{X1|plur}"),
            ],
        );
        let d1 = view.by_alias("D1").unwrap().id;
        view.update(
            &mut store,
            d1,
            &CstUpdate {
                term_forms: Some(vec![TermForm {
                    text: "sets".into(),
                    tags: "plur".into(),
                }]),
                ..Default::default()
            },
        )
        .unwrap();
        let x1 = view.by_alias("X1").unwrap().id;
        view.update(
            &mut store,
            x1,
            &CstUpdate {
                term_raw: Some("point".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(view.get(d1).unwrap().term_forms.is_empty());
    }

    #[test]
    fn test_change_type_regenerates_alias() {
        let mut store = InMemoryStore::new();
        let mut view = sample(&mut store);
        let s1 = view.by_alias("S1").unwrap().id;
        assert!(view.change_type(&mut store, s1, CstType::Term).unwrap());
        assert_eq!(view.get(s1).unwrap().alias, "D2");
        assert_eq!(view.by_alias("D1").unwrap().definition_formal, "Pr1(D2)");
        assert!(!view.change_type(&mut store, s1, CstType::Term).unwrap());
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_delete_marks_references() {
        let mut store = InMemoryStore::new();
        let mut view = sample(&mut store);
        let s1 = view.by_alias("S1").unwrap().id;
        view.delete(&mut store, &[s1]).unwrap();
        assert_eq!(aliases(&view), vec!["X1", "D1"]);
        assert_eq!(view.by_alias("D1").unwrap().definition_formal, "Pr1(DELETED)");
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_substitute_redirects_references() {
        let mut store = InMemoryStore::new();
        let mut view = view_with(
            &mut store,
            vec![
                ConstituentDraft::new("X1", CstType::Basic),
                ConstituentDraft::new("X2", CstType::Basic),
                ConstituentDraft::new("D1", CstType::Term)
                    .with_formal("X1×X2")
                    .with_term("@{X1|sing}"),
            ],
        );
        let x1 = view.by_alias("X1").unwrap().id;
        let x2 = view.by_alias("X2").unwrap().id;
        view.substitute(&mut store, &[(x1, x2)]).unwrap();
        assert_eq!(aliases(&view), vec!["X2", "D1"]);
        let d1 = view.by_alias("D1").unwrap();
        assert_eq!(d1.definition_formal, "X2×X2");
        assert_eq!(d1.term_raw, "@{X2|sing}");
        assert_in_sync(&view, &store);
    }

    #[test]
    fn test_dependants_one_hop() {
        let mut store = InMemoryStore::new();
        let view = sample(&mut store);
        let x1 = view.by_alias("X1").unwrap().id;
        let mut found = view.dependants(&[x1]);
        found.sort();
        let mut expected = vec![view.by_alias("S1").unwrap().id, view.by_alias("D1").unwrap().id];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_partial_mapping_touches_targets_only() {
        let mut store = InMemoryStore::new();
        let mut view = view_with(
            &mut store,
            vec![
                ConstituentDraft::new("X1", CstType::Basic),
                ConstituentDraft::new("D1", CstType::Term).with_formal("ℬ(X1)"),
                ConstituentDraft::new("D2", CstType::Term).with_formal("ℬℬ(X1)"),
            ],
        );
        let d2 = view.by_alias("D2").unwrap().id;
        let mapping = AliasMapping::from([("X1".to_string(), "X9".to_string())]);
        view.apply_partial_mapping(&mut store, &mapping, &[d2]).unwrap();
        assert_eq!(view.by_alias("D1").unwrap().definition_formal, "ℬ(X1)");
        assert_eq!(view.by_alias("D2").unwrap().definition_formal, "ℬℬ(X9)");
    }

    #[test]
    fn test_restore_order_and_reset_aliases() {
        let mut store = InMemoryStore::new();
        let mut view = view_with(
            &mut store,
            vec![
                ConstituentDraft::new("D3", CstType::Term).with_formal("Pr1(S4)"),
                ConstituentDraft::new("X7", CstType::Basic),
                ConstituentDraft::new("S4", CstType::Structured).with_formal("ℬ(X7×X2)"),
                ConstituentDraft::new("X2", CstType::Basic),
            ],
        );
        view.restore_order(&mut store).unwrap();
        assert_eq!(aliases(&view), vec!["X7", "X2", "S4", "D3"]);

        view.reset_aliases(&mut store).unwrap();
        assert_eq!(aliases(&view), vec!["X1", "X2", "S1", "D1"]);
        assert_eq!(view.by_alias("S1").unwrap().definition_formal, "ℬ(X1×X2)");
        assert_eq!(view.by_alias("D1").unwrap().definition_formal, "Pr1(S1)");
        assert_in_sync(&view, &store);
    }

    proptest! {
        #[test]
        fn insert_then_delete_leaves_others_untouched(position in 0usize..5) {
            let mut store = InMemoryStore::new();
            let mut view = view_with(
                &mut store,
                vec![
                    ConstituentDraft::new("X1", CstType::Basic),
                    ConstituentDraft::new("X2", CstType::Basic),
                    ConstituentDraft::new("D1", CstType::Term).with_formal("X1×X2"),
                    ConstituentDraft::new("D2", CstType::Term).with_formal("ℬ(D1)"),
                ],
            );
            let before: Vec<Constituent> = view.items().cloned().collect();
            let copy = vec![view.by_alias("D1").unwrap().clone()];

            let inserted = view
                .insert_copy(&mut store, &copy, Some(position), &AliasMapping::new())
                .unwrap();
            prop_assert_eq!(inserted[0].alias.as_str(), "D3");
            view.delete(&mut store, &[inserted[0].id]).unwrap();

            let after: Vec<Constituent> = view.items().cloned().collect();
            prop_assert_eq!(after, before);
            assert_in_sync(&view, &store);
        }
    }
}
