//! End-to-end cascade tests over real operation schemas.
//!
//! Each test builds an operation schema with the [`Harness`] helper,
//! executes its synthesis operations through the facade, edits an upstream
//! schema and checks every downstream schema against the expected result.
//!
//! Tests cover:
//! - Create cascades over two hops
//! - Diamond substitution leaving one surviving copy
//! - Contradicting substitutions rolled back as a whole
//! - Delete undoing a substitution
//! - Update divergence and retype cascades
//! - Operation-level entry points (execute, arguments, input binding)
//! - The same cascade on the SQLite backend

use cstform_core::id::{ConstituentId, OperationId, OssId, SchemaId};
use cstform_core::{ConstituentDraft, CstType, CstUpdate, OperationType};
use cstform_propagation::{atomic, PropagationError, PropagationFacade, SchemaView};
use cstform_storage::{hash_links, hash_schema, InMemoryStore, OssStore, SqliteStore};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

struct Harness<S> {
    store: S,
    facade: PropagationFacade,
    oss: OssId,
}

impl<S: OssStore> Harness<S> {
    fn with_store(mut store: S) -> Self {
        let oss = store.create_oss("OSS1").unwrap();
        Harness {
            store,
            facade: PropagationFacade::default(),
            oss: oss.id,
        }
    }

    /// Creates an input operation bound to a fresh schema holding `drafts`.
    fn input(&mut self, alias: &str, drafts: Vec<ConstituentDraft>) -> (OperationId, SchemaId) {
        let schema = self.store.create_schema(alias, "").unwrap();
        self.store.insert_constituents(schema.id, 0, &drafts).unwrap();
        let op = self
            .store
            .create_operation(self.oss, OperationType::Input, alias, Some(schema.id))
            .unwrap();
        (op.id, schema.id)
    }

    /// Creates a synthesis operation over `arguments` without executing it.
    fn synthesis(&mut self, alias: &str, arguments: &[OperationId]) -> OperationId {
        let op = self
            .store
            .create_operation(self.oss, OperationType::Synthesis, alias, None)
            .unwrap();
        for (order, argument) in arguments.iter().enumerate() {
            self.store
                .create_argument(op.id, *argument, order as u32)
                .unwrap();
        }
        op.id
    }

    fn execute(&mut self, operation: OperationId) -> SchemaId {
        let facade = &self.facade;
        let oss = self.oss;
        atomic(&mut self.store, |store| {
            facade.execute_operation(store, oss, operation)
        })
        .unwrap()
        .id
    }

    fn view(&self, schema: SchemaId) -> SchemaView {
        self.facade.load_view(&self.store, schema).unwrap()
    }

    fn aliases(&self, schema: SchemaId) -> Vec<String> {
        self.view(schema).items().map(|cst| cst.alias.clone()).collect()
    }

    fn id_of(&self, schema: SchemaId, alias: &str) -> ConstituentId {
        self.view(schema).by_alias(alias).unwrap().id
    }

    fn formal(&self, schema: SchemaId, alias: &str) -> String {
        self.view(schema)
            .by_alias(alias)
            .unwrap()
            .definition_formal
            .clone()
    }

    fn fingerprint(&self, schemas: &[SchemaId]) -> Vec<blake3::Hash> {
        let mut result: Vec<blake3::Hash> = schemas
            .iter()
            .map(|schema| hash_schema(&self.store.load_constituents(*schema).unwrap()))
            .collect();
        result.push(hash_links(
            &self.store.list_operations(self.oss).unwrap(),
            &self.store.list_arguments(self.oss).unwrap(),
            &self.store.list_substitutions(self.oss).unwrap(),
            &self.store.list_inheritance(self.oss).unwrap(),
        ));
        result
    }
}

impl Harness<InMemoryStore> {
    fn new() -> Self {
        Harness::with_store(InMemoryStore::new())
    }
}

fn basic(alias: &str) -> ConstituentDraft {
    ConstituentDraft::new(alias, CstType::Basic)
}

fn term(alias: &str, formal: &str) -> ConstituentDraft {
    ConstituentDraft::new(alias, CstType::Term).with_formal(formal)
}

/// Creates a constituent in `schema` and propagates it.
fn create_and_propagate<S: OssStore>(
    h: &mut Harness<S>,
    schema: SchemaId,
    draft: ConstituentDraft,
) -> ConstituentId {
    let mut view = h.view(schema);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        let created = view.create(store, draft, None)?;
        facade.after_create(store, &view, &[created.clone()])?;
        Ok(created.id)
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

fn two_hop_create<S: OssStore>(mut h: Harness<S>) {
    let (op_z, _) = h.input("Z", vec![basic("X1")]);
    let (op_a, a) = h.input(
        "A",
        vec![
            basic("X1"),
            ConstituentDraft::new("S1", CstType::Structured).with_formal("ℬ(X1)"),
        ],
    );
    let op_b = h.synthesis("B", &[op_z, op_a]);
    let b = h.execute(op_b);
    let op_c = h.synthesis("C", &[op_b]);
    let c = h.execute(op_c);
    assert_eq!(h.aliases(b), vec!["X1", "X2", "S1"]);
    assert_eq!(h.formal(b, "S1"), "ℬ(X2)");

    create_and_propagate(&mut h, a, term("D1", "Pr1(S1)×X1"));

    assert_eq!(h.aliases(b), vec!["X1", "X2", "S1", "D1"]);
    assert_eq!(h.formal(b, "D1"), "Pr1(S1)×X2");
    assert_eq!(h.aliases(c), vec!["X1", "X2", "S1", "D1"]);
    assert_eq!(h.formal(c, "D1"), "Pr1(S1)×X2");

    // Exactly one copy per hop
    let inheritance = h.store.list_inheritance(h.oss).unwrap();
    let d_b = h.id_of(b, "D1");
    let d_c = h.id_of(c, "D1");
    assert_eq!(inheritance.iter().filter(|l| l.child == d_b).count(), 1);
    assert_eq!(inheritance.iter().filter(|l| l.child == d_c).count(), 1);
    assert!(inheritance
        .iter()
        .any(|l| l.operation == op_c && l.parent == d_b && l.child == d_c));
}

#[test]
fn test_create_cascades_two_hops() {
    two_hop_create(Harness::new());
}

#[test]
fn test_create_cascades_two_hops_sqlite() {
    two_hop_create(Harness::with_store(SqliteStore::in_memory().unwrap()));
}

#[test]
fn test_create_keeps_relative_position() {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1"), basic("X2")]);
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);

    // New item lands after the copy of its predecessor
    let mut view = h.view(a);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        let created = view.create(store, basic("X3"), Some(1))?;
        facade.after_create(store, &view, &[created])
    })
    .unwrap();
    assert_eq!(h.aliases(a), vec!["X1", "X3", "X2"]);
    assert_eq!(h.aliases(b), vec!["X1", "X3", "X2"]);
}

// ---------------------------------------------------------------------------
// Substitute
// ---------------------------------------------------------------------------

/// A -> B, A -> C, B + C -> D with D identifying the copies of B and C.
/// With `b_survives` D keeps B's copies, otherwise C's.
fn diamond_substitution(b_survives: bool) {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1"), basic("X2"), term("D1", "X1×X2")]);
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    let op_c = h.synthesis("C", &[op_a]);
    let c = h.execute(op_c);

    let op_d = h.synthesis("D", &[op_b, op_c]);
    let (replaced, kept) = if b_survives { (c, b) } else { (b, c) };
    for alias in ["X1", "X2", "D1"] {
        let original = h.id_of(replaced, alias);
        let substitution = h.id_of(kept, alias);
        h.store
            .create_substitution(op_d, original, substitution)
            .unwrap();
    }
    let d = h.execute(op_d);
    assert_eq!(h.aliases(d), vec!["X1", "X2", "D1"]);

    let x1 = h.id_of(a, "X1");
    let x2 = h.id_of(a, "X2");
    let mut view = h.view(a);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        facade.before_substitute(store, &view, &[(x1, x2)])?;
        view.substitute(store, &[(x1, x2)])
    })
    .unwrap();

    assert_eq!(h.aliases(a), vec!["X2", "D1"]);
    assert_eq!(h.aliases(b), vec!["X2", "D1"]);
    assert_eq!(h.aliases(c), vec!["X2", "D1"]);
    assert_eq!(h.aliases(d), vec!["X2", "D1"]);
    assert_eq!(h.formal(d, "D1"), "X2×X2");

    // The surviving basics of B and C are still identified
    let subs = h.store.list_substitutions(h.oss).unwrap();
    assert_eq!(subs.len(), 2);
    assert!(subs.iter().any(|s| s.original == h.id_of(replaced, "X2")
        && s.substitution == h.id_of(kept, "X2")));
    let inherited = h
        .store
        .list_inheritance(h.oss)
        .unwrap()
        .into_iter()
        .filter(|l| l.operation == op_d)
        .count();
    assert_eq!(inherited, 2);
}

#[test]
fn test_diamond_substitution_leaves_one_copy() {
    diamond_substitution(true);
}

#[test]
fn test_diamond_substitution_reversed_leaves_one_copy() {
    diamond_substitution(false);
}

#[test]
fn test_contradiction_rolls_back_everything() {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1"), basic("X2")]);
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    let (op_y, y) = h.input("Y", vec![basic("X1"), basic("X2")]);
    let op_d = h.synthesis("D", &[op_b, op_y]);
    for alias in ["X1", "X2"] {
        let original = h.id_of(b, alias);
        let substitution = h.id_of(y, alias);
        h.store
            .create_substitution(op_d, original, substitution)
            .unwrap();
    }
    let d = h.execute(op_d);
    assert_eq!(h.aliases(d), vec!["X1", "X2"]);

    let before = h.fingerprint(&[a, b, y, d]);
    let x1 = h.id_of(a, "X1");
    let x2 = h.id_of(a, "X2");
    let mut view = h.view(a);
    let facade = &h.facade;
    let result = atomic(&mut h.store, |store| {
        // Writes into B and D before the contradiction surfaces
        let created = view.create(store, term("D1", "X1∪X2"), None)?;
        facade.after_create(store, &view, &[created])?;
        facade.before_substitute(store, &view, &[(x1, x2)])?;
        view.substitute(store, &[(x1, x2)])
    });

    assert!(matches!(
        result,
        Err(PropagationError::Contradiction { operation, .. }) if operation == op_d
    ));
    assert!(!h.store.in_transaction());
    assert_eq!(h.fingerprint(&[a, b, y, d]), before);
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// A(X1) and C(X1, D1=ℬ(X1)) merged into D with C.X1 replaced by A.X1.
fn substituted_merge() -> (Harness<InMemoryStore>, [SchemaId; 3], OperationId) {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1")]);
    let (op_c, c) = h.input("C", vec![basic("X1"), term("D1", "ℬ(X1)")]);
    let op_d = h.synthesis("D", &[op_a, op_c]);
    let original = h.id_of(c, "X1");
    let substitution = h.id_of(a, "X1");
    h.store
        .create_substitution(op_d, original, substitution)
        .unwrap();
    let d = h.execute(op_d);
    assert_eq!(h.aliases(d), vec!["X1", "D1"]);
    assert_eq!(h.formal(d, "D1"), "ℬ(X1)");
    (h, [a, c, d], op_d)
}

#[test]
fn test_delete_substitution_side_restores_original() {
    let (mut h, [a, c, d], op_d) = substituted_merge();
    let x1 = h.id_of(a, "X1");
    let mut view = h.view(a);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        facade.before_delete(store, &view, &[x1])?;
        view.delete(store, &[x1])
    })
    .unwrap();

    // C.X1 is back in D under its own copy and D1 points at it
    assert_eq!(h.aliases(d), vec!["X2", "D1"]);
    assert_eq!(h.formal(d, "D1"), "ℬ(X2)");
    assert!(h.store.list_substitutions(h.oss).unwrap().is_empty());
    let restored = h.id_of(d, "X2");
    let original = h.id_of(c, "X1");
    assert!(h
        .store
        .list_inheritance(h.oss)
        .unwrap()
        .iter()
        .any(|l| l.operation == op_d && l.parent == original && l.child == restored));
}

#[test]
fn test_delete_original_side_drops_references() {
    let (mut h, [_, c, d], _) = substituted_merge();
    let x1 = h.id_of(c, "X1");
    let mut view = h.view(c);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        facade.before_delete(store, &view, &[x1])?;
        view.delete(store, &[x1])
    })
    .unwrap();

    assert_eq!(h.formal(c, "D1"), "ℬ(DELETED)");
    // A.X1 survives in D; the copy of C.D1 loses its reference like C.D1
    assert_eq!(h.aliases(d), vec!["X1", "D1"]);
    assert_eq!(h.formal(d, "D1"), "ℬ(DELETED)");
    assert!(h.store.list_substitutions(h.oss).unwrap().is_empty());
}

#[test]
fn test_delete_cascades_two_hops() {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1"), term("D1", "ℬ(X1)")]);
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    let op_c = h.synthesis("C", &[op_b]);
    let c = h.execute(op_c);

    let x1 = h.id_of(a, "X1");
    let mut view = h.view(a);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        facade.before_delete(store, &view, &[x1])?;
        view.delete(store, &[x1])
    })
    .unwrap();
    for schema in [a, b, c] {
        assert_eq!(h.aliases(schema), vec!["D1"]);
        assert_eq!(h.formal(schema, "D1"), "ℬ(DELETED)");
    }
}

// ---------------------------------------------------------------------------
// Update and retype
// ---------------------------------------------------------------------------

#[test]
fn test_update_skips_diverged_fields() {
    let mut h = Harness::new();
    let (op_a, a) = h.input(
        "A",
        vec![basic("X1"), term("D1", "ℬ(X1)").with_convention("upstream")],
    );
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    let op_c = h.synthesis("C", &[op_b]);
    let c = h.execute(op_c);

    // B's copy gets its own convention
    let mut view_b = h.view(b);
    let d_b = h.id_of(b, "D1");
    view_b
        .update(
            &mut h.store,
            d_b,
            &CstUpdate {
                convention: Some("local".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let d_a = h.id_of(a, "D1");
    let data = CstUpdate {
        definition_formal: Some("ℬℬ(X1)".into()),
        convention: Some("revised".into()),
        ..Default::default()
    };
    let mut view = h.view(a);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        let old = view.update(store, d_a, &data)?;
        facade.after_update(store, &view, d_a, &data, &old)
    })
    .unwrap();

    let copy_b = h.view(b).by_alias("D1").unwrap().clone();
    assert_eq!(copy_b.definition_formal, "ℬℬ(X1)");
    assert_eq!(copy_b.convention, "local");
    // C only receives what B actually wrote
    let copy_c = h.view(c).by_alias("D1").unwrap().clone();
    assert_eq!(copy_c.definition_formal, "ℬℬ(X1)");
    assert_eq!(copy_c.convention, "upstream");
}

#[test]
fn test_retype_cascades() {
    let mut h = Harness::new();
    let (op_a, a) = h.input(
        "A",
        vec![
            basic("X1"),
            ConstituentDraft::new("S1", CstType::Structured).with_formal("ℬ(X1)"),
            term("D1", "Pr1(S1)"),
        ],
    );
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    let op_c = h.synthesis("C", &[op_b]);
    let c = h.execute(op_c);

    let s1 = h.id_of(a, "S1");
    let mut view = h.view(a);
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        view.change_type(store, s1, CstType::Term)?;
        facade.after_retype(store, &view, s1, CstType::Term)
    })
    .unwrap();

    for schema in [a, b, c] {
        assert_eq!(h.aliases(schema), vec!["X1", "D2", "D1"]);
        assert_eq!(h.formal(schema, "D1"), "Pr1(D2)");
    }
}

// ---------------------------------------------------------------------------
// Operation level
// ---------------------------------------------------------------------------

#[test]
fn test_execute_merges_operands() {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1"), term("D1", "ℬ(X1)")]);
    let (op_y, y) = h.input("Y", vec![term("D1", "X1"), basic("X1")]);
    let op_d = h.synthesis("D", &[op_a, op_y]);
    let original = h.id_of(y, "X1");
    let substitution = h.id_of(a, "X1");
    h.store
        .create_substitution(op_d, original, substitution)
        .unwrap();

    let d = h.execute(op_d);
    // Basics first, then the terms in reference order, aliases renumbered
    assert_eq!(h.aliases(d), vec!["X1", "D1", "D2"]);
    assert_eq!(h.formal(d, "D1"), "ℬ(X1)");
    assert_eq!(h.formal(d, "D2"), "X1");
    assert_eq!(h.store.get_operation(op_d).unwrap().result, Some(d));
    assert_eq!(
        h.store
            .list_inheritance(h.oss)
            .unwrap()
            .iter()
            .filter(|l| l.operation == op_d)
            .count(),
        3
    );
    assert_eq!(h.aliases(a), vec!["X1", "D1"]);
}

#[test]
fn test_execute_rejects_invalid_operations() {
    let mut h = Harness::new();
    let (op_a, _) = h.input("A", vec![basic("X1")]);
    let op_b = h.synthesis("B", &[op_a]);
    let op_c = h.synthesis("C", &[op_b]);
    let oss = h.oss;

    let facade = &h.facade;
    let result = atomic(&mut h.store, |store| facade.execute_operation(store, oss, op_a));
    assert!(matches!(result, Err(PropagationError::InvalidOperation { .. })));
    // B has no schema yet
    let result = atomic(&mut h.store, |store| facade.execute_operation(store, oss, op_c));
    assert!(matches!(result, Err(PropagationError::InvalidOperation { .. })));

    h.execute(op_b);
    let facade = &h.facade;
    let result = atomic(&mut h.store, |store| facade.execute_operation(store, oss, op_b));
    assert!(matches!(result, Err(PropagationError::InvalidOperation { .. })));
}

#[test]
fn test_set_input_replaces_downstream() {
    let mut h = Harness::new();
    let (op_a, a) = h.input("A", vec![basic("X1"), basic("X2")]);
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    assert_eq!(h.aliases(b), vec!["X1", "X2"]);

    let replacement = h.store.create_schema("A2", "").unwrap();
    h.store
        .insert_constituents(replacement.id, 0, &[basic("X1"), term("D1", "ℬ(X1)")])
        .unwrap();
    let oss = h.oss;
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        facade.set_input(store, oss, op_a, Some(replacement.id))
    })
    .unwrap();

    assert_eq!(h.store.get_operation(op_a).unwrap().result, Some(replacement.id));
    assert_eq!(h.aliases(b), vec!["X1", "D1"]);
    assert_eq!(h.formal(b, "D1"), "ℬ(X1)");
    // The old schema itself is left alone
    assert_eq!(h.aliases(a), vec!["X1", "X2"]);

    let facade = &h.facade;
    let result = atomic(&mut h.store, |store| facade.set_input(store, oss, op_b, None));
    assert!(matches!(result, Err(PropagationError::InvalidOperation { .. })));
}

#[test]
fn test_arguments_added_and_removed() {
    let mut h = Harness::new();
    let (op_a, _) = h.input("A", vec![basic("X1")]);
    let (op_z, _) = h.input("Z", vec![basic("X1"), term("D1", "ℬ(X1)")]);
    let op_b = h.synthesis("B", &[op_a]);
    let b = h.execute(op_b);
    let op_c = h.synthesis("C", &[op_b]);
    let c = h.execute(op_c);

    let oss = h.oss;
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        store.create_argument(op_b, op_z, 1)?;
        facade.after_create_arguments(store, oss, op_b, &[op_z])
    })
    .unwrap();
    assert_eq!(h.aliases(b), vec!["X1", "X2", "D1"]);
    assert_eq!(h.formal(b, "D1"), "ℬ(X2)");
    assert_eq!(h.aliases(c), vec!["X1", "X2", "D1"]);

    let argument = h
        .store
        .list_arguments(oss)
        .unwrap()
        .into_iter()
        .find(|arg| arg.operation == op_b && arg.argument == op_z)
        .unwrap();
    let facade = &h.facade;
    atomic(&mut h.store, |store| {
        facade.before_delete_arguments(store, oss, op_b, &[op_z])?;
        store.delete_argument(argument.id)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(h.aliases(b), vec!["X1"]);
    assert_eq!(h.aliases(c), vec!["X1"]);
}
