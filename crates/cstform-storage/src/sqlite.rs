//! SQLite implementation of [`OssStore`].
//!
//! [`SqliteStore`] persists schemas and operation schemas in a SQLite
//! database with WAL mode and automatic schema migrations. Every write runs
//! inside a savepoint so it is atomic on its own and nests cleanly inside an
//! explicit `BEGIN` opened by [`OssStore::begin`]. Term forms are stored as a
//! JSON TEXT column via serde_json.

use rusqlite::{params, Connection, OptionalExtension, Row};

use cstform_core::id::{
    ArgumentId, ConstituentId, InheritanceId, OperationId, OssId, SchemaId, SubstitutionId,
};
use cstform_core::{
    Argument, Constituent, ConstituentDraft, CstType, Inheritance, Operation, OperationType, Oss,
    Schema, Substitution, TermForm,
};

use crate::error::StorageError;
use crate::traits::OssStore;

const CONSTITUENT_COLUMNS: &str = "id, schema_id, alias, cst_type, cst_order, convention, \
     definition_formal, definition_raw, definition_resolved, term_raw, term_resolved, term_forms";

const OPERATION_COLUMNS: &str = "id, oss_id, operation_type, alias, result_id";

/// SQLite-backed implementation of [`OssStore`].
pub struct SqliteStore {
    conn: Connection,
}

/// A constituent row before its TEXT-encoded columns are decoded.
struct ConstituentRow {
    id: i64,
    schema: i64,
    alias: String,
    cst_type: String,
    order: u32,
    convention: String,
    definition_formal: String,
    definition_raw: String,
    definition_resolved: String,
    term_raw: String,
    term_resolved: String,
    term_forms: String,
}

impl ConstituentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ConstituentRow {
            id: row.get(0)?,
            schema: row.get(1)?,
            alias: row.get(2)?,
            cst_type: row.get(3)?,
            order: row.get(4)?,
            convention: row.get(5)?,
            definition_formal: row.get(6)?,
            definition_raw: row.get(7)?,
            definition_resolved: row.get(8)?,
            term_raw: row.get(9)?,
            term_resolved: row.get(10)?,
            term_forms: row.get(11)?,
        })
    }

    fn decode(self) -> Result<Constituent, StorageError> {
        let term_forms: Vec<TermForm> = serde_json::from_str(&self.term_forms)?;
        Ok(Constituent {
            id: ConstituentId(self.id),
            schema: SchemaId(self.schema),
            alias: self.alias,
            cst_type: CstType::parse(&self.cst_type)?,
            order: self.order,
            convention: self.convention,
            definition_formal: self.definition_formal,
            definition_raw: self.definition_raw,
            definition_resolved: self.definition_resolved,
            term_raw: self.term_raw,
            term_resolved: self.term_resolved,
            term_forms,
        })
    }
}

/// An operation row before its type column is decoded.
struct OperationRow {
    id: i64,
    oss: i64,
    operation_type: String,
    alias: String,
    result: Option<i64>,
}

impl OperationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OperationRow {
            id: row.get(0)?,
            oss: row.get(1)?,
            operation_type: row.get(2)?,
            alias: row.get(3)?,
            result: row.get(4)?,
        })
    }

    fn decode(self) -> Result<Operation, StorageError> {
        Ok(Operation {
            id: OperationId(self.id),
            oss: OssId(self.oss),
            operation_type: OperationType::parse(&self.operation_type)?,
            alias: self.alias,
            result: self.result.map(SchemaId),
        })
    }
}

fn read_argument(row: &Row<'_>) -> rusqlite::Result<Argument> {
    Ok(Argument {
        id: ArgumentId(row.get(0)?),
        operation: OperationId(row.get(1)?),
        argument: OperationId(row.get(2)?),
        order: row.get(3)?,
    })
}

fn read_substitution(row: &Row<'_>) -> rusqlite::Result<Substitution> {
    Ok(Substitution {
        id: SubstitutionId(row.get(0)?),
        operation: OperationId(row.get(1)?),
        original: ConstituentId(row.get(2)?),
        substitution: ConstituentId(row.get(3)?),
    })
}

fn read_inheritance(row: &Row<'_>) -> rusqlite::Result<Inheritance> {
    Ok(Inheritance {
        id: InheritanceId(row.get(0)?),
        operation: OperationId(row.get(1)?),
        parent: ConstituentId(row.get(2)?),
        child: ConstituentId(row.get(3)?),
    })
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn exists(&self, table: &str, id: i64) -> Result<bool, StorageError> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table);
        let exists: bool = self.conn.query_row(&sql, params![id], |row| row.get(0))?;
        Ok(exists)
    }

    fn assert_schema_exists(&self, id: SchemaId) -> Result<(), StorageError> {
        if !self.exists("schemas", id.0)? {
            return Err(StorageError::SchemaNotFound(id.0));
        }
        Ok(())
    }

    fn assert_oss_exists(&self, id: OssId) -> Result<(), StorageError> {
        if !self.exists("oss", id.0)? {
            return Err(StorageError::OssNotFound(id.0));
        }
        Ok(())
    }

    fn assert_operation_exists(&self, id: OperationId) -> Result<(), StorageError> {
        if !self.exists("operations", id.0)? {
            return Err(StorageError::OperationNotFound(id.0));
        }
        Ok(())
    }

    fn assert_constituent_exists(&self, id: ConstituentId) -> Result<(), StorageError> {
        if !self.exists("constituents", id.0)? {
            return Err(StorageError::ConstituentNotFound(id.0));
        }
        Ok(())
    }

    fn query_operations(&self, sql: &str, id: i64) -> Result<Vec<Operation>, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![id], OperationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OperationRow::decode).collect()
    }
}

impl OssStore for SqliteStore {
    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    fn begin(&mut self) -> Result<(), StorageError> {
        if self.in_transaction() {
            return Err(StorageError::Transaction {
                reason: "transaction already open".into(),
            });
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction() {
            return Err(StorageError::Transaction {
                reason: "commit without an open transaction".into(),
            });
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction() {
            return Err(StorageError::Transaction {
                reason: "rollback without an open transaction".into(),
            });
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    // -----------------------------------------------------------------------
    // Schemas
    // -----------------------------------------------------------------------

    fn create_schema(&mut self, alias: &str, title: &str) -> Result<Schema, StorageError> {
        self.conn.execute(
            "INSERT INTO schemas (alias, title) VALUES (?1, ?2)",
            params![alias, title],
        )?;
        Ok(Schema {
            id: SchemaId(self.conn.last_insert_rowid()),
            alias: alias.to_string(),
            title: title.to_string(),
        })
    }

    fn get_schema(&self, id: SchemaId) -> Result<Schema, StorageError> {
        self.conn
            .query_row(
                "SELECT id, alias, title FROM schemas WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Schema {
                        id: SchemaId(row.get(0)?),
                        alias: row.get(1)?,
                        title: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::SchemaNotFound(id.0))
    }

    fn list_schemas(&self) -> Result<Vec<Schema>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, alias, title FROM schemas ORDER BY id")?;
        let items = stmt
            .query_map([], |row| {
                Ok(Schema {
                    id: SchemaId(row.get(0)?),
                    alias: row.get(1)?,
                    title: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Constituents
    // -----------------------------------------------------------------------

    fn load_constituents(&self, schema: SchemaId) -> Result<Vec<Constituent>, StorageError> {
        self.assert_schema_exists(schema)?;
        let sql = format!(
            "SELECT {} FROM constituents WHERE schema_id = ?1 ORDER BY cst_order, id",
            CONSTITUENT_COLUMNS
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![schema.0], ConstituentRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ConstituentRow::decode).collect()
    }

    fn get_constituent(&self, id: ConstituentId) -> Result<Constituent, StorageError> {
        let sql = format!(
            "SELECT {} FROM constituents WHERE id = ?1",
            CONSTITUENT_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id.0], ConstituentRow::read)
            .optional()?
            .ok_or(StorageError::ConstituentNotFound(id.0))?
            .decode()
    }

    fn insert_constituents(
        &mut self,
        schema: SchemaId,
        first_order: u32,
        drafts: &[ConstituentDraft],
    ) -> Result<Vec<Constituent>, StorageError> {
        self.assert_schema_exists(schema)?;
        let sp = self.conn.savepoint()?;
        let mut created = Vec::with_capacity(drafts.len());
        {
            let mut stmt = sp.prepare_cached(
                "INSERT INTO constituents (schema_id, alias, cst_type, cst_order, convention, \
                 definition_formal, definition_raw, definition_resolved, term_raw, \
                 term_resolved, term_forms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for (offset, draft) in drafts.iter().enumerate() {
                let order = first_order + offset as u32;
                let forms_json = serde_json::to_string(&draft.term_forms)?;
                stmt.execute(params![
                    schema.0,
                    draft.alias,
                    draft.cst_type.as_str(),
                    order,
                    draft.convention,
                    draft.definition_formal,
                    draft.definition_raw,
                    draft.definition_resolved,
                    draft.term_raw,
                    draft.term_resolved,
                    forms_json,
                ])?;
                let id = ConstituentId(sp.last_insert_rowid());
                created.push(draft.clone().into_constituent(id, schema, order));
            }
        }
        sp.commit()?;
        Ok(created)
    }

    fn update_constituents(&mut self, items: &[Constituent]) -> Result<(), StorageError> {
        let sp = self.conn.savepoint()?;
        {
            let mut stmt = sp.prepare_cached(
                "UPDATE constituents SET alias = ?2, cst_type = ?3, cst_order = ?4, \
                 convention = ?5, definition_formal = ?6, definition_raw = ?7, \
                 definition_resolved = ?8, term_raw = ?9, term_resolved = ?10, \
                 term_forms = ?11 WHERE id = ?1",
            )?;
            for item in items {
                let forms_json = serde_json::to_string(&item.term_forms)?;
                let changed = stmt.execute(params![
                    item.id.0,
                    item.alias,
                    item.cst_type.as_str(),
                    item.order,
                    item.convention,
                    item.definition_formal,
                    item.definition_raw,
                    item.definition_resolved,
                    item.term_raw,
                    item.term_resolved,
                    forms_json,
                ])?;
                if changed == 0 {
                    // Dropping the savepoint rolls it back.
                    return Err(StorageError::ConstituentNotFound(item.id.0));
                }
            }
        }
        sp.commit()?;
        Ok(())
    }

    fn delete_constituents(&mut self, ids: &[ConstituentId]) -> Result<(), StorageError> {
        let sp = self.conn.savepoint()?;
        {
            let mut stmt = sp.prepare_cached("DELETE FROM constituents WHERE id = ?1")?;
            for id in ids {
                if stmt.execute(params![id.0])? == 0 {
                    return Err(StorageError::ConstituentNotFound(id.0));
                }
            }
        }
        sp.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operation schemas and operations
    // -----------------------------------------------------------------------

    fn create_oss(&mut self, alias: &str) -> Result<Oss, StorageError> {
        self.conn
            .execute("INSERT INTO oss (alias) VALUES (?1)", params![alias])?;
        Ok(Oss {
            id: OssId(self.conn.last_insert_rowid()),
            alias: alias.to_string(),
        })
    }

    fn get_oss(&self, id: OssId) -> Result<Oss, StorageError> {
        self.conn
            .query_row(
                "SELECT id, alias FROM oss WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Oss {
                        id: OssId(row.get(0)?),
                        alias: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::OssNotFound(id.0))
    }

    fn create_operation(
        &mut self,
        oss: OssId,
        operation_type: OperationType,
        alias: &str,
        result: Option<SchemaId>,
    ) -> Result<Operation, StorageError> {
        self.assert_oss_exists(oss)?;
        if let Some(schema) = result {
            self.assert_schema_exists(schema)?;
        }
        self.conn.execute(
            "INSERT INTO operations (oss_id, operation_type, alias, result_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![oss.0, operation_type.as_str(), alias, result.map(|s| s.0)],
        )?;
        Ok(Operation {
            id: OperationId(self.conn.last_insert_rowid()),
            oss,
            operation_type,
            alias: alias.to_string(),
            result,
        })
    }

    fn get_operation(&self, id: OperationId) -> Result<Operation, StorageError> {
        let sql = format!("SELECT {} FROM operations WHERE id = ?1", OPERATION_COLUMNS);
        self.conn
            .query_row(&sql, params![id.0], OperationRow::read)
            .optional()?
            .ok_or(StorageError::OperationNotFound(id.0))?
            .decode()
    }

    fn list_operations(&self, oss: OssId) -> Result<Vec<Operation>, StorageError> {
        self.assert_oss_exists(oss)?;
        let sql = format!(
            "SELECT {} FROM operations WHERE oss_id = ?1 ORDER BY id",
            OPERATION_COLUMNS
        );
        self.query_operations(&sql, oss.0)
    }

    fn find_operations_by_result(&self, schema: SchemaId) -> Result<Vec<Operation>, StorageError> {
        let sql = format!(
            "SELECT {} FROM operations WHERE result_id = ?1 ORDER BY id",
            OPERATION_COLUMNS
        );
        self.query_operations(&sql, schema.0)
    }

    fn set_operation_result(
        &mut self,
        id: OperationId,
        result: Option<SchemaId>,
    ) -> Result<(), StorageError> {
        if let Some(schema) = result {
            self.assert_schema_exists(schema)?;
        }
        let changed = self.conn.execute(
            "UPDATE operations SET result_id = ?2 WHERE id = ?1",
            params![id.0, result.map(|s| s.0)],
        )?;
        if changed == 0 {
            return Err(StorageError::OperationNotFound(id.0));
        }
        Ok(())
    }

    fn delete_operation(&mut self, id: OperationId) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute("DELETE FROM operations WHERE id = ?1", params![id.0])?;
        if changed == 0 {
            return Err(StorageError::OperationNotFound(id.0));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    fn create_argument(
        &mut self,
        operation: OperationId,
        argument: OperationId,
        order: u32,
    ) -> Result<Argument, StorageError> {
        self.assert_operation_exists(operation)?;
        self.assert_operation_exists(argument)?;
        let duplicate: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM arguments WHERE operation_id = ?1 AND argument_id = ?2)",
            params![operation.0, argument.0],
            |row| row.get(0),
        )?;
        if duplicate {
            return Err(StorageError::IntegrityError {
                reason: format!("operation {} already takes {} as argument", operation, argument),
            });
        }
        self.conn.execute(
            "INSERT INTO arguments (operation_id, argument_id, arg_order) VALUES (?1, ?2, ?3)",
            params![operation.0, argument.0, order],
        )?;
        Ok(Argument {
            id: ArgumentId(self.conn.last_insert_rowid()),
            operation,
            argument,
            order,
        })
    }

    fn list_arguments(&self, oss: OssId) -> Result<Vec<Argument>, StorageError> {
        self.assert_oss_exists(oss)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT a.id, a.operation_id, a.argument_id, a.arg_order FROM arguments a \
             JOIN operations o ON o.id = a.operation_id WHERE o.oss_id = ?1 \
             ORDER BY a.operation_id, a.arg_order, a.id",
        )?;
        let items = stmt
            .query_map(params![oss.0], read_argument)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn delete_argument(&mut self, id: ArgumentId) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute("DELETE FROM arguments WHERE id = ?1", params![id.0])?;
        if changed == 0 {
            return Err(StorageError::ArgumentNotFound(id.0));
        }
        Ok(())
    }

    fn create_substitution(
        &mut self,
        operation: OperationId,
        original: ConstituentId,
        substitution: ConstituentId,
    ) -> Result<Substitution, StorageError> {
        self.assert_operation_exists(operation)?;
        self.assert_constituent_exists(original)?;
        self.assert_constituent_exists(substitution)?;
        self.conn.execute(
            "INSERT INTO substitutions (operation_id, original_id, substitution_id) \
             VALUES (?1, ?2, ?3)",
            params![operation.0, original.0, substitution.0],
        )?;
        Ok(Substitution {
            id: SubstitutionId(self.conn.last_insert_rowid()),
            operation,
            original,
            substitution,
        })
    }

    fn list_substitutions(&self, oss: OssId) -> Result<Vec<Substitution>, StorageError> {
        self.assert_oss_exists(oss)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.id, s.operation_id, s.original_id, s.substitution_id FROM substitutions s \
             JOIN operations o ON o.id = s.operation_id WHERE o.oss_id = ?1 ORDER BY s.id",
        )?;
        let items = stmt
            .query_map(params![oss.0], read_substitution)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn update_substitution(&mut self, item: &Substitution) -> Result<(), StorageError> {
        self.assert_constituent_exists(item.original)?;
        self.assert_constituent_exists(item.substitution)?;
        let changed = self.conn.execute(
            "UPDATE substitutions SET operation_id = ?2, original_id = ?3, substitution_id = ?4 \
             WHERE id = ?1",
            params![
                item.id.0,
                item.operation.0,
                item.original.0,
                item.substitution.0
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::SubstitutionNotFound(item.id.0));
        }
        Ok(())
    }

    fn delete_substitution(&mut self, id: SubstitutionId) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute("DELETE FROM substitutions WHERE id = ?1", params![id.0])?;
        if changed == 0 {
            return Err(StorageError::SubstitutionNotFound(id.0));
        }
        Ok(())
    }

    fn create_inheritance(
        &mut self,
        operation: OperationId,
        links: &[(ConstituentId, ConstituentId)],
    ) -> Result<Vec<Inheritance>, StorageError> {
        self.assert_operation_exists(operation)?;
        for (parent, child) in links {
            self.assert_constituent_exists(*parent)?;
            self.assert_constituent_exists(*child)?;
        }
        let sp = self.conn.savepoint()?;
        let mut created = Vec::with_capacity(links.len());
        {
            let mut stmt = sp.prepare_cached(
                "INSERT INTO inheritance (operation_id, parent_id, child_id) VALUES (?1, ?2, ?3)",
            )?;
            for &(parent, child) in links {
                stmt.execute(params![operation.0, parent.0, child.0])?;
                created.push(Inheritance {
                    id: InheritanceId(sp.last_insert_rowid()),
                    operation,
                    parent,
                    child,
                });
            }
        }
        sp.commit()?;
        Ok(created)
    }

    fn list_inheritance(&self, oss: OssId) -> Result<Vec<Inheritance>, StorageError> {
        self.assert_oss_exists(oss)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT i.id, i.operation_id, i.parent_id, i.child_id FROM inheritance i \
             JOIN operations o ON o.id = i.operation_id WHERE o.oss_id = ?1 ORDER BY i.id",
        )?;
        let items = stmt
            .query_map(params![oss.0], read_inheritance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn update_inheritance(&mut self, item: &Inheritance) -> Result<(), StorageError> {
        self.assert_constituent_exists(item.parent)?;
        self.assert_constituent_exists(item.child)?;
        let changed = self.conn.execute(
            "UPDATE inheritance SET operation_id = ?2, parent_id = ?3, child_id = ?4 \
             WHERE id = ?1",
            params![item.id.0, item.operation.0, item.parent.0, item.child.0],
        )?;
        if changed == 0 {
            return Err(StorageError::InheritanceNotFound(item.id.0));
        }
        Ok(())
    }

    fn delete_inheritance(&mut self, id: InheritanceId) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute("DELETE FROM inheritance WHERE id = ?1", params![id.0])?;
        if changed == 0 {
            return Err(StorageError::InheritanceNotFound(id.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (SqliteStore, Schema, Vec<Constituent>) {
        let mut store = SqliteStore::in_memory().unwrap();
        let schema = store.create_schema("S1", "Sets").unwrap();
        let items = store
            .insert_constituents(
                schema.id,
                0,
                &[
                    ConstituentDraft::new("X1", CstType::Basic).with_term("element"),
                    ConstituentDraft::new("D1", CstType::Term)
                        .with_formal("ℬ(X1)")
                        .with_term("set of @{X1|plur,gent}"),
                ],
            )
            .unwrap();
        (store, schema, items)
    }

    #[test]
    fn test_constituents_roundtrip() {
        let (store, schema, items) = seeded();
        let loaded = store.load_constituents(schema.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], items[0]);
        assert_eq!(loaded[1].definition_formal, "ℬ(X1)");
        assert_eq!(store.get_constituent(items[0].id).unwrap(), items[0]);
    }

    #[test]
    fn test_update_persists_term_forms() {
        let (mut store, _, mut items) = seeded();
        items[1].term_forms = vec![TermForm {
            text: "sets".into(),
            tags: "plur".into(),
        }];
        items[1].alias = "D2".into();
        store.update_constituents(&items[1..]).unwrap();

        let loaded = store.get_constituent(items[1].id).unwrap();
        assert_eq!(loaded, items[1]);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let (mut store, _, items) = seeded();
        let mut renamed = items[0].clone();
        renamed.alias = "X9".into();
        let mut ghost = items[1].clone();
        ghost.id = ConstituentId(999);

        let result = store.update_constituents(&[renamed, ghost]);
        assert!(matches!(result, Err(StorageError::ConstituentNotFound(999))));
        assert_eq!(store.get_constituent(items[0].id).unwrap().alias, "X1");
    }

    #[test]
    fn test_delete_cascades_links() {
        let (mut store, schema, items) = seeded();
        let oss = store.create_oss("OSS").unwrap();
        let target = store.create_schema("S2", "").unwrap();
        let op = store
            .create_operation(oss.id, OperationType::Input, "A", Some(schema.id))
            .unwrap();
        let copies = store
            .insert_constituents(target.id, 0, &[items[0].to_draft(), items[1].to_draft()])
            .unwrap();
        store
            .create_inheritance(
                op.id,
                &[(items[0].id, copies[0].id), (items[1].id, copies[1].id)],
            )
            .unwrap();
        store
            .create_substitution(op.id, copies[0].id, copies[1].id)
            .unwrap();

        store.delete_constituents(&[items[0].id]).unwrap();
        assert_eq!(store.list_inheritance(oss.id).unwrap().len(), 1);
        assert_eq!(store.list_substitutions(oss.id).unwrap().len(), 1);

        store.delete_constituents(&[copies[1].id]).unwrap();
        assert!(store.list_inheritance(oss.id).unwrap().is_empty());
        assert!(store.list_substitutions(oss.id).unwrap().is_empty());
    }

    #[test]
    fn test_operations_and_arguments() {
        let (mut store, schema, _) = seeded();
        let oss = store.create_oss("OSS").unwrap();
        let a = store
            .create_operation(oss.id, OperationType::Input, "A", Some(schema.id))
            .unwrap();
        let b = store
            .create_operation(oss.id, OperationType::Synthesis, "B", None)
            .unwrap();
        let arg = store.create_argument(b.id, a.id, 0).unwrap();
        assert!(matches!(
            store.create_argument(b.id, a.id, 1),
            Err(StorageError::IntegrityError { .. })
        ));

        assert_eq!(store.list_operations(oss.id).unwrap(), vec![a.clone(), b.clone()]);
        assert_eq!(store.list_arguments(oss.id).unwrap(), vec![arg]);
        assert_eq!(store.find_operations_by_result(schema.id).unwrap(), vec![a.clone()]);

        let result = store.create_schema("B", "").unwrap();
        store.set_operation_result(b.id, Some(result.id)).unwrap();
        assert_eq!(store.get_operation(b.id).unwrap().result, Some(result.id));

        store.delete_operation(a.id).unwrap();
        assert!(store.list_arguments(oss.id).unwrap().is_empty());
        assert!(matches!(
            store.get_operation(a.id),
            Err(StorageError::OperationNotFound(_))
        ));
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (mut store, schema, items) = seeded();
        store.begin().unwrap();
        assert!(store.in_transaction());
        store.delete_constituents(&[items[1].id]).unwrap();
        store.create_schema("S2", "").unwrap();
        store.rollback().unwrap();

        assert!(!store.in_transaction());
        assert_eq!(store.load_constituents(schema.id).unwrap().len(), 2);
        assert_eq!(store.list_schemas().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_keeps_writes() {
        let (mut store, schema, items) = seeded();
        store.begin().unwrap();
        store.delete_constituents(&[items[1].id]).unwrap();
        store.commit().unwrap();
        assert_eq!(store.load_constituents(schema.id).unwrap().len(), 1);
    }

    #[test]
    fn test_transaction_sequence_errors() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(matches!(store.commit(), Err(StorageError::Transaction { .. })));
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(StorageError::Transaction { .. })));
        store.rollback().unwrap();
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();
        let schema_id = {
            let mut store = SqliteStore::new(path).unwrap();
            let schema = store.create_schema("S1", "").unwrap();
            store
                .insert_constituents(schema.id, 0, &[ConstituentDraft::new("X1", CstType::Basic)])
                .unwrap();
            schema.id
        };
        let store = SqliteStore::new(path).unwrap();
        let loaded = store.load_constituents(schema_id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].alias, "X1");
    }
}
