//! Translation of references and ids from a schema into the vocabulary of
//! one downstream operation's schema.
//!
//! All lookups go through [`LinkIndex`], so these functions do not depend on
//! how inheritance and substitution records are cached.

use indexmap::IndexSet;

use cstform_core::id::{ConstituentId, OperationId};
use cstform_core::text::replace_globals;
use cstform_core::{AliasMapping, Constituent, CstUpdate, TextResolver, DELETED_ALIAS};

use crate::cache::LinkIndex;
use crate::schema_view::SchemaView;

/// Alias used in the current schema -> the constituent it names there.
///
/// `None` marks a dependency that has no counterpart (it will be written as
/// `DELETED`).
pub type DependencyMapping = indexmap::IndexMap<String, Option<ConstituentId>>;

/// `(replaced, restored)` pairs of an undone substitution; a missing
/// restored side rewrites to `DELETED`.
pub type PartialMapping = Vec<(ConstituentId, Option<ConstituentId>)>;

/// Moves every dependency to its successor in `operation`.
pub fn transform_mapping(
    links: &dyn LinkIndex,
    mapping: &DependencyMapping,
    operation: OperationId,
) -> DependencyMapping {
    mapping
        .iter()
        .map(|(alias, target)| {
            let successor = target.and_then(|id| links.successor(id, operation));
            (alias.clone(), successor)
        })
        .collect()
}

/// Turns a transformed mapping into alias renames valid in `view`.
pub fn produce_alias_mapping(mapping: &DependencyMapping, view: &SchemaView) -> AliasMapping {
    mapping
        .iter()
        .map(|(alias, target)| {
            let renamed = target
                .and_then(|id| view.get(id))
                .map_or_else(|| DELETED_ALIAS.to_string(), |cst| cst.alias.clone());
            (alias.clone(), renamed)
        })
        .collect()
}

/// Re-keys a transformed mapping by the aliases it was renamed to, making it
/// the dependency mapping of the downstream schema.
pub fn rekey(mapping: DependencyMapping, aliases: &AliasMapping) -> DependencyMapping {
    mapping
        .into_iter()
        .map(|(alias, target)| {
            let key = aliases.get(&alias).cloned().unwrap_or(alias);
            (key, target)
        })
        .collect()
}

/// Where a copy of `prototype` goes in `destination`.
///
/// Right after the successor of the prototype's predecessor; first if the
/// prototype is first; `None` (append) if the predecessor has no successor.
pub fn insert_position(
    links: &dyn LinkIndex,
    source: &SchemaView,
    destination: &SchemaView,
    prototype: ConstituentId,
    operation: OperationId,
) -> Option<usize> {
    let index = source.position(prototype)?;
    if index == 0 {
        return Some(0);
    }
    let previous = source.at(index - 1)?;
    let inherited = links.successor(previous.id, operation)?;
    destination.position(inherited).map(|position| position + 1)
}

/// Aliases referenced by the new and old values of the text fields present
/// in `data`.
pub fn update_references(
    data: &CstUpdate,
    old: &CstUpdate,
    resolver: &dyn TextResolver,
) -> IndexSet<String> {
    let mut result = data.references(resolver);
    result.extend(old.references(resolver));
    result
}

/// Builds the update to apply to a downstream copy.
///
/// Every field of `data` is translated through `mapping`. A field is kept
/// only if the copy still holds the translated previous value; otherwise the
/// copy was edited on its own and keeps its value.
pub fn prepare_update(
    current: &Constituent,
    data: &CstUpdate,
    old: &CstUpdate,
    mapping: &AliasMapping,
    resolver: &dyn TextResolver,
) -> CstUpdate {
    let mut result = CstUpdate::default();
    if let (Some(new), Some(prev)) = (&data.convention, &old.convention) {
        if *prev == current.convention {
            result.convention = Some(new.clone());
        }
    }
    if let (Some(new), Some(prev)) = (&data.definition_formal, &old.definition_formal) {
        if replace_globals(prev, mapping) == current.definition_formal {
            result.definition_formal = Some(replace_globals(new, mapping));
        }
    }
    if let (Some(new), Some(prev)) = (&data.definition_raw, &old.definition_raw) {
        if resolver.replace_references(prev, mapping) == current.definition_raw {
            result.definition_raw = Some(resolver.replace_references(new, mapping));
        }
    }
    if let (Some(new), Some(prev)) = (&data.term_raw, &old.term_raw) {
        if resolver.replace_references(prev, mapping) == current.term_raw {
            result.term_raw = Some(resolver.replace_references(new, mapping));
        }
    }
    if let (Some(new), Some(prev)) = (&data.term_forms, &old.term_forms) {
        if *prev == current.term_forms {
            result.term_forms = Some(new.clone());
        }
    }
    result
}

/// Moves both sides of every pair to their successors in `operation`.
/// Pairs whose replaced side has no successor are dropped.
pub fn transform_partial(
    links: &dyn LinkIndex,
    pairs: &[(ConstituentId, Option<ConstituentId>)],
    operation: OperationId,
) -> PartialMapping {
    pairs
        .iter()
        .filter_map(|&(replaced, restored)| {
            let replaced = links.successor(replaced, operation)?;
            let restored = restored.and_then(|id| links.successor(id, operation));
            Some((replaced, restored))
        })
        .collect()
}

/// Alias renames for a partial mapping inside `view`.
pub fn partial_alias_mapping(
    pairs: &[(ConstituentId, Option<ConstituentId>)],
    view: &SchemaView,
) -> AliasMapping {
    pairs
        .iter()
        .filter_map(|&(replaced, restored)| {
            let from = view.get(replaced)?.alias.clone();
            let to = restored
                .and_then(|id| view.get(id))
                .map_or_else(|| DELETED_ALIAS.to_string(), |cst| cst.alias.clone());
            Some((from, to))
        })
        .collect()
}
