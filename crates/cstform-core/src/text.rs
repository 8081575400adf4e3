//! Reference syntax shared by formal expressions and raw text.
//!
//! Formal expressions mention other constituents directly by alias
//! (`X1∈ℬ(S2)`). Raw term and definition text mention them through entity
//! references of the form `@{ALIAS|grammemes}`; `@{-1|word}` style references
//! point at neighbouring words instead of constituents and are left alone by
//! alias rewriting.
//!
//! The natural-language side is consumed through the [`TextResolver`] trait.
//! [`EntityReferenceResolver`] is the default implementation: it extracts and
//! rewrites entity references and resolves them to the referenced term text.
//! Inflection by grammemes is not performed.

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::{Captures, Regex};

/// Alias written in place of references to constituents that no longer exist.
pub const DELETED_ALIAS: &str = "DELETED";

/// Rename table from old alias to new alias.
pub type AliasMapping = IndexMap<String, String>;

/// Resolved term text by alias, used as resolution context.
pub type TermContext = HashMap<String, String>;

static GLOBAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[XCSADFPTN][0-9]+\b").expect("valid alias pattern"));

static ENTITY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@\{([^0-9\-\}\|\{][^\}\|\{]*?)\|([^\}]*)\}").expect("valid entity pattern")
});

static SYNTACTIC_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@\{(-?[0-9]+)\|([^\}]*)\}").expect("valid syntactic pattern")
});

/// Returns every alias mentioned in a formal expression, in order of first
/// appearance.
pub fn extract_globals(expression: &str) -> IndexSet<String> {
    GLOBAL_ID
        .find_iter(expression)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Rewrites aliases in a formal expression through `mapping`.
///
/// Aliases absent from the mapping are kept as is.
pub fn replace_globals(expression: &str, mapping: &AliasMapping) -> String {
    if mapping.is_empty() || expression.is_empty() {
        return expression.to_string();
    }
    GLOBAL_ID
        .replace_all(expression, |caps: &Captures<'_>| {
            let alias = &caps[0];
            mapping.get(alias).cloned().unwrap_or_else(|| alias.to_string())
        })
        .into_owned()
}

/// The natural-language text collaborator.
///
/// Everything the propagation core needs from raw text goes through these
/// three calls.
pub trait TextResolver {
    /// Returns the aliases referenced by entity references in `text`.
    fn extract_references(&self, text: &str) -> IndexSet<String>;

    /// Rewrites entity references in `text` through `mapping`.
    fn replace_references(&self, text: &str, mapping: &AliasMapping) -> String;

    /// Expands all references in `text` using `context`.
    fn resolve(&self, text: &str, context: &TermContext) -> String;
}

/// Regex-based [`TextResolver`] for `@{ALIAS|grammemes}` references.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityReferenceResolver;

impl TextResolver for EntityReferenceResolver {
    fn extract_references(&self, text: &str) -> IndexSet<String> {
        ENTITY_REF
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    fn replace_references(&self, text: &str, mapping: &AliasMapping) -> String {
        if mapping.is_empty() || text.is_empty() {
            return text.to_string();
        }
        ENTITY_REF
            .replace_all(text, |caps: &Captures<'_>| {
                let alias = &caps[1];
                match mapping.get(alias) {
                    Some(target) => format!("@{{{}|{}}}", target, &caps[2]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn resolve(&self, text: &str, context: &TermContext) -> String {
        if !text.contains("@{") {
            return text.to_string();
        }
        let entities = ENTITY_REF.replace_all(text, |caps: &Captures<'_>| {
            let alias = &caps[1];
            match context.get(alias) {
                Some(term) if !term.is_empty() => term.clone(),
                _ => alias.to_string(),
            }
        });
        SYNTACTIC_REF
            .replace_all(&entities, |caps: &Captures<'_>| caps[2].to_string())
            .into_owned()
    }
}
