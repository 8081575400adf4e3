//! Deterministic content hashing for schemas using blake3.
//!
//! Fingerprints are derived state, never stored. They let callers (and the
//! CLI) check that a failed edit left a schema exactly as it was.
//!
//! # Levels
//!
//! - **Level 1**: constituent content hash (identity, alias, kind, texts)
//! - **Level 2**: schema hash over constituent hashes in list order
//! - **Level 3**: link hash over an operation schema's records
//!
//! Ordering is always explicit: constituents in list order, link records
//! sorted by id. No `HashMap` is iterated for hash-affecting input.

use cstform_core::{Argument, Constituent, Inheritance, Operation, Substitution};

/// Computes a blake3 hash of a constituent's stored content.
///
/// Uses `serde_json::to_vec` for canonical serialization; `Constituent`
/// holds only strings, vectors and plain ids, so the JSON is deterministic.
pub fn hash_constituent(cst: &Constituent) -> blake3::Hash {
    let bytes = serde_json::to_vec(cst).expect("Constituent serialization should never fail");
    blake3::hash(&bytes)
}

/// Computes the fingerprint of a schema from its constituents in list order.
pub fn hash_schema(constituents: &[Constituent]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(constituents.len() as u64).to_le_bytes());
    for cst in constituents {
        hasher.update(hash_constituent(cst).as_bytes());
    }
    hasher.finalize()
}

/// Computes the fingerprint of an operation schema's operations and link
/// records.
pub fn hash_links(
    operations: &[Operation],
    arguments: &[Argument],
    substitutions: &[Substitution],
    inheritance: &[Inheritance],
) -> blake3::Hash {
    let mut operations = operations.to_vec();
    operations.sort_by_key(|op| op.id);
    let mut arguments = arguments.to_vec();
    arguments.sort_by_key(|arg| arg.id);
    let mut substitutions = substitutions.to_vec();
    substitutions.sort_by_key(|sub| sub.id);
    let mut inheritance = inheritance.to_vec();
    inheritance.sort_by_key(|link| link.id);

    let mut hasher = blake3::Hasher::new();
    for op in &operations {
        hasher.update(&op.id.0.to_le_bytes());
        hasher.update(op.operation_type.as_str().as_bytes());
        hasher.update(&op.result.map_or(-1, |s| s.0).to_le_bytes());
    }
    hasher.update(b"|args");
    for arg in &arguments {
        hasher.update(&arg.operation.0.to_le_bytes());
        hasher.update(&arg.argument.0.to_le_bytes());
        hasher.update(&arg.order.to_le_bytes());
    }
    hasher.update(b"|subs");
    for sub in &substitutions {
        hasher.update(&sub.operation.0.to_le_bytes());
        hasher.update(&sub.original.0.to_le_bytes());
        hasher.update(&sub.substitution.0.to_le_bytes());
    }
    hasher.update(b"|inh");
    for link in &inheritance {
        hasher.update(&link.operation.0.to_le_bytes());
        hasher.update(&link.parent.0.to_le_bytes());
        hasher.update(&link.child.0.to_le_bytes());
    }
    hasher.finalize()
}
