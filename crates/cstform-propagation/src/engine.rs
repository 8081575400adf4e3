//! [`PropagationEngine`]: cascades edits of one schema through the
//! downstream operations of an operation schema.
//!
//! Every cascade step works on one operation: it translates the change into
//! the vocabulary of the operation's result schema, applies it there through
//! the cached [`SchemaView`](crate::SchemaView) and recurses into the
//! operations that take it as an argument. Deletes and substitutions recurse
//! before the local change so children still see the records they need.
//!
//! The engine never commits. The caller wraps a session in a transaction
//! and rolls back on the first error.

use indexmap::IndexMap;

use cstform_core::id::{ConstituentId, OperationId, SchemaId};
use cstform_core::{
    AliasMapping, Constituent, CstType, CstUpdate, Inheritance, Operation, OperationType, Schema,
    Substitution,
};
use cstform_storage::OssStore;

use crate::cache::{LinkIndex, OssCache};
use crate::error::PropagationError;
use crate::mapping::{
    insert_position, partial_alias_mapping, prepare_update, produce_alias_mapping, rekey,
    transform_mapping, transform_partial, DependencyMapping,
};

/// Where inherited copies go in the target schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Right after the copy of the first prototype's predecessor.
    AfterPredecessor,
    End,
}

/// One propagation session over one operation schema.
pub struct PropagationEngine<'s> {
    store: &'s mut dyn OssStore,
    cache: OssCache,
}

impl<'s> PropagationEngine<'s> {
    /// Creates a session, loading the link records of the cached operation
    /// schema if needed.
    pub fn new(store: &'s mut dyn OssStore, mut cache: OssCache) -> Result<Self, PropagationError> {
        cache.ensure_loaded(&*store)?;
        Ok(PropagationEngine { store, cache })
    }

    pub fn cache(&self) -> &OssCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut OssCache {
        &mut self.cache
    }

    pub fn into_cache(self) -> OssCache {
        self.cache
    }

    fn operation(&self, id: OperationId) -> Result<&Operation, PropagationError> {
        self.cache
            .operation(id)
            .ok_or(PropagationError::UnknownOperation(id))
    }

    /// The result schema of `operation` with its view loaded, or `None` if
    /// the operation has no result yet.
    fn bound_view(&mut self, operation: OperationId) -> Result<Option<SchemaId>, PropagationError> {
        let Some(schema) = self.cache.schema_of(operation) else {
            return Ok(None);
        };
        self.cache.ensure_view(&*self.store, schema)?;
        Ok(Some(schema))
    }

    // -------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------

    /// Copies `items` of `source` (the result of `operation`) into every
    /// downstream schema.
    ///
    /// `mapping` maps the aliases the items reference to the constituents
    /// they name in `source`.
    pub fn on_create(
        &mut self,
        operation: OperationId,
        source: SchemaId,
        items: &[ConstituentId],
        mapping: &DependencyMapping,
    ) -> Result<(), PropagationError> {
        for child in self.cache.children(operation) {
            self.inherit_into(child, source, items, mapping, Placement::AfterPredecessor)?;
        }
        Ok(())
    }

    /// Copies `items` of `source` into the result of `operation`, records the
    /// inheritance and continues downstream.
    fn inherit_into(
        &mut self,
        operation: OperationId,
        source: SchemaId,
        items: &[ConstituentId],
        mapping: &DependencyMapping,
        placement: Placement,
    ) -> Result<(), PropagationError> {
        let Some(target) = self.bound_view(operation)? else {
            return Ok(());
        };
        self.cache.ensure_view(&*self.store, source)?;
        let source_view = self.cache.view(source)?;
        let prototypes: Vec<Constituent> = items
            .iter()
            .filter_map(|id| source_view.get(*id))
            .filter(|cst| self.cache.successor(cst.id, operation).is_none())
            .cloned()
            .collect();
        let Some(first) = prototypes.first() else {
            return Ok(());
        };

        let transformed = transform_mapping(&self.cache, mapping, operation);
        let target_view = self.cache.view(target)?;
        let aliases = produce_alias_mapping(&transformed, target_view);
        let position = match placement {
            Placement::AfterPredecessor => {
                insert_position(&self.cache, source_view, target_view, first.id, operation)
            }
            Placement::End => None,
        };

        let created = self.cache.view_mut(target)?.insert_copy(
            &mut *self.store,
            &prototypes,
            position,
            &aliases,
        )?;
        let links: Vec<(ConstituentId, ConstituentId)> = prototypes
            .iter()
            .zip(&created)
            .map(|(parent, child)| (parent.id, child.id))
            .collect();
        for record in self.store.create_inheritance(operation, &links)? {
            self.cache.insert_inheritance(record);
        }
        tracing::debug!(
            "operation {} inherited {} constituent(s) from schema {}",
            operation,
            created.len(),
            source
        );

        let next = rekey(transformed, &aliases);
        let created: Vec<ConstituentId> = created.iter().map(|cst| cst.id).collect();
        self.on_create(operation, target, &created, &next)
    }

    // -------------------------------------------------------------------
    // Retype and update
    // -------------------------------------------------------------------

    /// Changes the kind of every downstream copy of `id`.
    pub fn on_retype(
        &mut self,
        operation: OperationId,
        id: ConstituentId,
        kind: CstType,
    ) -> Result<(), PropagationError> {
        for child in self.cache.children(operation) {
            let Some(target) = self.bound_view(child)? else {
                continue;
            };
            let Some(inherited) = self.cache.inheritor(id, child) else {
                continue;
            };
            let changed = self
                .cache
                .view_mut(target)?
                .change_type(&mut *self.store, inherited, kind)?;
            if changed {
                self.on_retype(child, inherited, kind)?;
            }
        }
        Ok(())
    }

    /// Writes `data` into every downstream copy of `id` whose fields still
    /// hold the translated `old` values.
    pub fn on_update(
        &mut self,
        operation: OperationId,
        id: ConstituentId,
        data: &CstUpdate,
        old: &CstUpdate,
        mapping: &DependencyMapping,
    ) -> Result<(), PropagationError> {
        for child in self.cache.children(operation) {
            let Some(target) = self.bound_view(child)? else {
                continue;
            };
            let Some(inherited) = self.cache.inheritor(id, child) else {
                continue;
            };
            let transformed = transform_mapping(&self.cache, mapping, child);
            let view = self.cache.view(target)?;
            let aliases = produce_alias_mapping(&transformed, view);
            let Some(current) = view.get(inherited) else {
                continue;
            };
            let prepared = prepare_update(current, data, old, &aliases, view.resolver());
            if prepared.is_empty() {
                tracing::debug!("copy {} in schema {} diverged, update skipped", inherited, target);
                continue;
            }

            let previous = self
                .cache
                .view_mut(target)?
                .update(&mut *self.store, inherited, &prepared)?;
            if previous.is_empty() {
                continue;
            }
            let mut written = prepared;
            written.retain_fields_of(&previous);
            let next = rekey(transformed, &aliases);
            self.on_update(child, inherited, &written, &previous, &next)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------

    /// Deletes every downstream copy of `ids`.
    pub fn on_delete(
        &mut self,
        operation: OperationId,
        ids: &[ConstituentId],
    ) -> Result<(), PropagationError> {
        for child in self.cache.children(operation) {
            self.delete_inherited(child, ids)?;
        }
        Ok(())
    }

    /// Deletes the copies of `parents` in the result of `operation` and
    /// everything inherited from them further down.
    fn delete_inherited(
        &mut self,
        operation: OperationId,
        parents: &[ConstituentId],
    ) -> Result<(), PropagationError> {
        let Some(target) = self.bound_view(operation)? else {
            return Ok(());
        };
        let doomed: Vec<Substitution> = self
            .cache
            .substitutions(operation)
            .iter()
            .filter(|sub| parents.contains(&sub.original) || parents.contains(&sub.substitution))
            .copied()
            .collect();
        for sub in &doomed {
            self.undo_substitution(operation, target, sub, parents)?;
        }

        let inherited = self.cache.inheritors(parents, operation);
        if inherited.is_empty() {
            return Ok(());
        }
        for child in self.cache.children(operation) {
            self.delete_inherited(child, &inherited)?;
        }
        self.cache.forget_constituents(&inherited);
        self.cache
            .view_mut(target)?
            .delete(&mut *self.store, &inherited)?;
        tracing::debug!(
            "deleted {} inherited constituent(s) from schema {}",
            inherited.len(),
            target
        );
        Ok(())
    }

    /// Removes a substitution of `operation` and restores the original's copy
    /// in `target`, pointing the dependants of the original back at it.
    ///
    /// Constituents in `ignore` are being deleted by the same cascade and are
    /// neither restored nor remapped.
    fn undo_substitution(
        &mut self,
        operation: OperationId,
        target: SchemaId,
        sub: &Substitution,
        ignore: &[ConstituentId],
    ) -> Result<(), PropagationError> {
        let home = self.store.get_constituent(sub.original)?.schema;
        self.cache.ensure_view(&*self.store, home)?;
        let home_view = self.cache.view(home)?;
        let dependants: Vec<ConstituentId> = home_view
            .dependants(&[sub.original])
            .into_iter()
            .filter(|id| !ignore.contains(id))
            .collect();
        let mapping = home_view.dependency_mapping(&[sub.original]);
        let dependants = self.cache.inheritors(&dependants, operation);

        self.store.delete_substitution(sub.id)?;
        self.cache.remove_substitution(operation, sub.id);
        tracing::debug!(
            "undoing substitution {} -> {} in operation {}",
            sub.original,
            sub.substitution,
            operation
        );

        let restored = if ignore.contains(&sub.original) {
            None
        } else {
            self.inherit_into(
                operation,
                home,
                &[sub.original],
                &mapping,
                Placement::AfterPredecessor,
            )?;
            self.cache.inheritor(sub.original, operation)
        };
        if dependants.is_empty() {
            return Ok(());
        }
        if let Some(replaced) = self.cache.inheritor(sub.substitution, operation) {
            self.partial_mapping(operation, target, &[(replaced, restored)], &dependants)?;
        }
        Ok(())
    }

    /// Rewrites references inside `targets` only and repeats the rewrite for
    /// their copies downstream.
    fn partial_mapping(
        &mut self,
        operation: OperationId,
        schema: SchemaId,
        pairs: &[(ConstituentId, Option<ConstituentId>)],
        targets: &[ConstituentId],
    ) -> Result<(), PropagationError> {
        let aliases = partial_alias_mapping(pairs, self.cache.view(schema)?);
        if aliases.is_empty() {
            return Ok(());
        }
        self.cache
            .view_mut(schema)?
            .apply_partial_mapping(&mut *self.store, &aliases, targets)?;

        for child in self.cache.children(operation) {
            let Some(next) = self.bound_view(child)? else {
                continue;
            };
            let moved = transform_partial(&self.cache, pairs, child);
            let next_targets = self.cache.inheritors(targets, child);
            if moved.is_empty() || next_targets.is_empty() {
                continue;
            }
            self.partial_mapping(child, next, &moved, &next_targets)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Substitute
    // -------------------------------------------------------------------

    /// Identifies the downstream copies of every `(original, substitution)`
    /// pair of the result of `operation`.
    pub fn on_substitute(
        &mut self,
        operation: OperationId,
        pairs: &[(ConstituentId, ConstituentId)],
    ) -> Result<(), PropagationError> {
        for child in self.cache.children(operation) {
            let Some(target) = self.bound_view(child)? else {
                continue;
            };
            let moved = self.transform_substitutions(child, pairs)?;
            if moved.is_empty() {
                continue;
            }
            self.on_substitute(child, &moved)?;

            let originals: Vec<ConstituentId> = moved.iter().map(|(original, _)| *original).collect();
            self.cache.forget_constituents(&originals);
            self.cache
                .view_mut(target)?
                .substitute(&mut *self.store, &moved)?;
            tracing::debug!("substituted {} pair(s) in schema {}", moved.len(), target);
        }
        Ok(())
    }

    /// Translates upstream pairs into pairs of the result of `operation`,
    /// rewriting the operation's own substitutions so they survive the
    /// upstream delete of each original.
    ///
    /// A pair whose sides were both replaced in `operation` is a
    /// contradiction unless the two replacements converge.
    fn transform_substitutions(
        &mut self,
        operation: OperationId,
        pairs: &[(ConstituentId, ConstituentId)],
    ) -> Result<Vec<(ConstituentId, ConstituentId)>, PropagationError> {
        let mut result = Vec::new();
        for &(original, substitution) in pairs {
            if original == substitution {
                continue;
            }
            let original_successor = self.cache.successor(original, operation);
            let substitution_successor = self.cache.successor(substitution, operation);
            if original_successor.is_some() && original_successor == substitution_successor {
                self.absorb_merged(operation, original, substitution)?;
                continue;
            }

            let original_record = self.cache.substitution_for(original, operation).copied();
            let substitution_record = self.cache.substitution_for(substitution, operation).copied();
            let mut new_original = self.cache.inheritor(original, operation);
            let mut new_substitution = self.cache.inheritor(substitution, operation);
            match (original_record, substitution_record) {
                (Some(original_record), Some(substitution_record)) => {
                    if !self.converges(
                        original,
                        &original_record,
                        substitution,
                        &substitution_record,
                    )? {
                        tracing::warn!(
                            "substitution {} -> {} contradicts operation {}",
                            original,
                            substitution,
                            operation
                        );
                        return Err(PropagationError::Contradiction {
                            operation,
                            original,
                            substitution,
                        });
                    }
                    // The replacements are merged by a later pass over their
                    // own operand; identify them here already.
                    let updated = Substitution {
                        original: original_record.substitution,
                        substitution: substitution_record.substitution,
                        ..original_record
                    };
                    self.store.update_substitution(&updated)?;
                    self.cache.replace_substitution(updated);
                    new_original = self.cache.inheritor(updated.original, operation);
                    new_substitution = self.cache.inheritor(updated.substitution, operation);
                }
                (None, Some(record)) => {
                    new_substitution = self.cache.inheritor(record.substitution, operation);
                }
                (Some(record), None) => {
                    let updated = Substitution {
                        original: substitution,
                        ..record
                    };
                    self.store.update_substitution(&updated)?;
                    self.cache.replace_substitution(updated);
                    new_original = new_substitution;
                    new_substitution = self.cache.inheritor(record.substitution, operation);
                }
                (None, None) => {}
            }
            self.redirect_substitutions(operation, original, substitution)?;

            if let (Some(o), Some(s)) = (new_original, new_substitution) {
                if o != s {
                    result.push((o, s));
                }
            }
        }
        Ok(result)
    }

    /// Whether two replaced constituents can be merged downstream: both
    /// replacements live in the same schema and each one is a copy of the
    /// same upstream constituent as the side it replaced.
    fn converges(
        &self,
        original: ConstituentId,
        original_record: &Substitution,
        substitution: ConstituentId,
        substitution_record: &Substitution,
    ) -> Result<bool, PropagationError> {
        let left = original_record.substitution;
        let right = substitution_record.substitution;
        if left == right {
            return Ok(false);
        }
        if self.store.get_constituent(left)?.schema != self.store.get_constituent(right)?.schema {
            return Ok(false);
        }
        let shares = |a: &[ConstituentId], b: &[ConstituentId]| a.iter().any(|id| b.contains(id));
        Ok(shares(&self.lineage(original)?, &self.lineage(left)?)
            && shares(&self.lineage(substitution)?, &self.lineage(right)?))
    }

    /// `id` followed by the prototypes it was copied from, nearest first.
    fn lineage(&self, id: ConstituentId) -> Result<Vec<ConstituentId>, PropagationError> {
        let mut result = vec![id];
        let mut current = id;
        loop {
            let schema = self.store.get_constituent(current)?.schema;
            let Some(host) = self.cache.operation_for_schema(schema) else {
                break;
            };
            let parent = self
                .cache
                .inheritance(host)
                .iter()
                .find(|link| link.child == current)
                .map(|link| link.parent);
            match parent {
                Some(parent) if !result.contains(&parent) => {
                    result.push(parent);
                    current = parent;
                }
                _ => break,
            }
        }
        Ok(result)
    }

    /// Cleans up after a pair whose sides already share one downstream copy.
    fn absorb_merged(
        &mut self,
        operation: OperationId,
        original: ConstituentId,
        substitution: ConstituentId,
    ) -> Result<(), PropagationError> {
        let stale: Vec<Substitution> = self
            .cache
            .substitutions(operation)
            .iter()
            .filter(|sub| {
                sub.original == original
                    || (sub.original == substitution && sub.substitution == original)
            })
            .copied()
            .collect();
        for sub in stale {
            self.store.delete_substitution(sub.id)?;
            self.cache.remove_substitution(operation, sub.id);
        }

        let link = self
            .cache
            .inheritance(operation)
            .iter()
            .find(|link| link.parent == original)
            .copied();
        if let Some(link) = link {
            if self.cache.inheritor(substitution, operation).is_none() {
                let moved = Inheritance {
                    parent: substitution,
                    ..link
                };
                self.store.update_inheritance(&moved)?;
                self.cache.replace_inheritance(moved);
            }
        }
        self.redirect_substitutions(operation, original, substitution)
    }

    /// Points substitutions that used `from` as replacement at `to`.
    fn redirect_substitutions(
        &mut self,
        operation: OperationId,
        from: ConstituentId,
        to: ConstituentId,
    ) -> Result<(), PropagationError> {
        let affected: Vec<Substitution> = self
            .cache
            .substitutions(operation)
            .iter()
            .filter(|sub| sub.substitution == from)
            .copied()
            .collect();
        for record in affected {
            let updated = Substitution {
                substitution: to,
                ..record
            };
            self.store.update_substitution(&updated)?;
            self.cache.replace_substitution(updated);
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Operation level
    // -------------------------------------------------------------------

    /// Builds the result schema of a synthesis operation from its operands
    /// and propagates it downstream.
    pub fn execute_operation(&mut self, id: OperationId) -> Result<Schema, PropagationError> {
        let operation = self.operation(id)?.clone();
        if operation.operation_type != OperationType::Synthesis {
            return Err(PropagationError::InvalidOperation {
                operation: id,
                reason: "only synthesis operations can be executed".into(),
            });
        }
        if operation.result.is_some() {
            return Err(PropagationError::InvalidOperation {
                operation: id,
                reason: "operation already has a result schema".into(),
            });
        }
        let mut operands = Vec::new();
        for argument in self.cache.arguments_of(id) {
            match self.cache.schema_of(argument) {
                Some(schema) => operands.push(schema),
                None => {
                    return Err(PropagationError::InvalidOperation {
                        operation: id,
                        reason: format!("argument {} has no schema", argument),
                    })
                }
            }
        }

        let schema = self.store.create_schema(&operation.alias, "")?;
        self.store.set_operation_result(id, Some(schema.id))?;
        self.cache.set_result(id, Some(schema.id));
        self.cache.ensure_view(&*self.store, schema.id)?;

        // copy -> prototype, prototype -> copy
        let mut parents: IndexMap<ConstituentId, ConstituentId> = IndexMap::new();
        let mut copies: IndexMap<ConstituentId, ConstituentId> = IndexMap::new();
        for operand in operands {
            self.cache.ensure_view(&*self.store, operand)?;
            let items: Vec<Constituent> = self.cache.view(operand)?.items().cloned().collect();
            let created = self.cache.view_mut(schema.id)?.insert_copy(
                &mut *self.store,
                &items,
                None,
                &AliasMapping::new(),
            )?;
            for (prototype, copy) in items.iter().zip(&created) {
                parents.insert(copy.id, prototype.id);
                copies.insert(prototype.id, copy.id);
            }
        }

        let declared: IndexMap<ConstituentId, ConstituentId> = self
            .cache
            .substitutions(id)
            .iter()
            .filter_map(|sub| Some((*copies.get(&sub.original)?, *copies.get(&sub.substitution)?)))
            .collect();
        let pairs = resolve_chains(&declared).ok_or_else(|| PropagationError::InvalidOperation {
            operation: id,
            reason: "substitutions form a cycle".into(),
        })?;
        self.cache
            .view_mut(schema.id)?
            .substitute(&mut *self.store, &pairs)?;

        let view = self.cache.view(schema.id)?;
        let links: Vec<(ConstituentId, ConstituentId)> = view
            .items()
            .filter_map(|cst| parents.get(&cst.id).map(|parent| (*parent, cst.id)))
            .collect();
        for record in self.store.create_inheritance(id, &links)? {
            self.cache.insert_inheritance(record);
        }

        let view = self.cache.view_mut(schema.id)?;
        view.restore_order(&mut *self.store)?;
        view.reset_aliases(&mut *self.store)?;
        view.resolve_all_text(&mut *self.store)?;
        let ids = view.ids();
        tracing::info!(
            "executed operation {} into schema {} ({} constituents)",
            id,
            schema.id,
            ids.len()
        );

        if !self.cache.children(id).is_empty() {
            self.on_create(id, schema.id, &ids, &DependencyMapping::new())?;
        }
        Ok(self.cache.view(schema.id)?.schema().clone())
    }

    /// Appends copies of every constituent of the new `operands` of
    /// `operation`. The argument records must already exist.
    pub fn after_create_arguments(
        &mut self,
        operation: OperationId,
        operands: &[OperationId],
    ) -> Result<(), PropagationError> {
        for operand in operands {
            let Some(schema) = self.bound_view(*operand)? else {
                continue;
            };
            let ids = self.cache.view(schema)?.ids();
            self.inherit_into(
                operation,
                schema,
                &ids,
                &DependencyMapping::new(),
                Placement::End,
            )?;
        }
        Ok(())
    }

    /// Deletes everything `operation` inherited from `operands`. The
    /// argument records are removed by the caller afterwards.
    pub fn before_delete_arguments(
        &mut self,
        operation: OperationId,
        operands: &[OperationId],
    ) -> Result<(), PropagationError> {
        for operand in operands {
            let Some(schema) = self.bound_view(*operand)? else {
                continue;
            };
            let ids = self.cache.view(schema)?.ids();
            self.delete_inherited(operation, &ids)?;
        }
        Ok(())
    }

    /// Binds an input operation to `schema` (or unbinds it), replacing
    /// everything downstream that came from the previous schema.
    pub fn set_input(
        &mut self,
        id: OperationId,
        schema: Option<SchemaId>,
    ) -> Result<(), PropagationError> {
        let operation = self.operation(id)?;
        if operation.operation_type != OperationType::Input {
            return Err(PropagationError::InvalidOperation {
                operation: id,
                reason: "only input operations can be bound to a schema".into(),
            });
        }
        let previous = operation.result;
        if previous == schema {
            return Ok(());
        }
        let has_children = !self.cache.children(id).is_empty();

        if let Some(old) = previous {
            if has_children {
                self.cache.ensure_view(&*self.store, old)?;
                let ids = self.cache.view(old)?.ids();
                self.on_delete(id, &ids)?;
            }
            self.cache.remove_view(old);
        }
        self.store.set_operation_result(id, schema)?;
        self.cache.set_result(id, schema);
        tracing::info!("operation {} bound to schema {:?}", id, schema);

        if let Some(new) = schema {
            self.cache.ensure_view(&*self.store, new)?;
            if has_children {
                let ids = self.cache.view(new)?.ids();
                self.on_create(id, new, &ids, &DependencyMapping::new())?;
            }
        }
        Ok(())
    }
}

/// Follows chains of substitutions to their final replacement.
///
/// Returns `None` if the substitutions form a cycle.
fn resolve_chains(
    declared: &IndexMap<ConstituentId, ConstituentId>,
) -> Option<Vec<(ConstituentId, ConstituentId)>> {
    let mut result = Vec::with_capacity(declared.len());
    for (&original, &first) in declared {
        let mut target = first;
        let mut steps = 0;
        while let Some(&next) = declared.get(&target) {
            steps += 1;
            if steps > declared.len() || next == original {
                return None;
            }
            target = next;
        }
        result.push((original, target));
    }
    Some(result)
}
