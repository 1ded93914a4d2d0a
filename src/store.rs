//! The SQL storage collaborator.
//!
//! Documents live in a single `documents` table keyed by
//! `(collection_id, id)` with the JSON payload in `data`. The engine pushes
//! down what it can prove safe: collection selection, `_id` equality
//! through the key column, top-level scalar equality through
//! `json_extract` (with a `json_type` escape that keeps array-typed rows
//! for the in-engine broadcast evaluation), an `ORDER BY json_extract`
//! locality hint, and `LIMIT`/`OFFSET` for covering scans. Everything else
//! is residual work for the engine.
//!
//! One connection is shared behind a mutex and acquired per storage call;
//! scans materialise their rows before releasing it, so the connection is
//! never held across a caller-visible suspension point.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use bson::{Bson, Document};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::json;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    db   TEXT NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (db, name)
);
CREATE TABLE IF NOT EXISTS documents (
    collection_id INTEGER NOT NULL,
    id            TEXT NOT NULL,
    data          TEXT NOT NULL,
    PRIMARY KEY (collection_id, id)
);
CREATE TABLE IF NOT EXISTS indexes (
    collection_id INTEGER NOT NULL,
    name          TEXT NOT NULL,
    key_spec      TEXT NOT NULL,
    unique_flag   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (collection_id, name)
);
";

/// Handle on the shared SQLite connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// A pushed-down scan: `WHERE` clauses with their parameters, an ordering
/// hint, and an optional window. `covering` records that the clauses imply
/// the whole filter, leaving no residual predicate.
#[derive(Debug, Default)]
pub struct ScanPlan {
    pub clauses: Vec<String>,
    pub params: Vec<SqlValue>,
    pub order_hint: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub covering: bool,
}

impl ScanPlan {
    /// A plan with no pushdown at all: the full collection in natural order.
    pub fn full() -> ScanPlan {
        ScanPlan {
            covering: true,
            ..ScanPlan::default()
        }
    }

    /// Derives the best-effort pushdown for a filter.
    pub fn for_filter(filter: &Filter) -> ScanPlan {
        let mut plan = ScanPlan::default();
        let equalities = filter.pushdown_equalities();
        let mut pushed_ids = 0;
        for (p, operand) in &equalities {
            if *p == "_id" {
                plan.clauses.push("id = ?".to_owned());
                plan.params.push(SqlValue::Text(encode_id_key(operand)));
                pushed_ids += 1;
                continue;
            }
            if !is_plain_identifier(p) {
                continue;
            }
            let param = match **operand {
                Bson::String(ref s) => SqlValue::Text(s.clone()),
                Bson::I32(i) => SqlValue::Integer(i64::from(i)),
                Bson::I64(i) => SqlValue::Integer(i),
                Bson::FloatingPoint(f) => SqlValue::Real(f),
                Bson::Boolean(b) => SqlValue::Integer(if b { 1 } else { 0 }),
                _ => continue,
            };
            // The json_type escape keeps array-valued rows in the scan: the
            // engine still has to check those for an element match.
            plan.clauses.push(format!(
                "(json_extract(data, '$.{}') = ? OR json_type(data, '$.{}') = 'array')",
                p, p
            ));
            plan.params.push(param);
        }
        plan.covering = filter.is_only_equalities() && pushed_ids == equalities.len();
        plan
    }

    /// Adds the `ORDER BY json_extract` locality hint for a single-key
    /// sort. The engine re-sorts authoritatively either way.
    pub fn hint_order(&mut self, field: &str, ascending: bool) {
        if is_plain_identifier(field) {
            self.order_hint = Some(format!(
                "json_extract(data, '$.{}') {}",
                field,
                if ascending { "ASC" } else { "DESC" }
            ));
        }
    }
}

fn is_plain_identifier(p: &str) -> bool {
    let mut chars = p.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Canonical key-column encoding of an `_id` value. The prefix keeps the
/// value spaces of the different types disjoint; integer-valued doubles
/// collapse onto the integer encoding because the two compare equal.
pub fn encode_id_key(id: &Bson) -> String {
    match *id {
        Bson::ObjectId(ref oid) => format!("o:{}", oid.to_hex()),
        Bson::String(ref s) => format!("s:{}", s),
        Bson::I32(i) => format!("n:{}", i),
        Bson::I64(i) => format!("n:{}", i),
        Bson::FloatingPoint(f) => {
            if f.fract() == 0.0 && f >= i64::min_value() as f64 && f <= i64::max_value() as f64 {
                format!("n:{}", f as i64)
            } else {
                format!("n:{}", f)
            }
        }
        Bson::Boolean(b) => format!("b:{}", b),
        Bson::UtcDatetime(ref when) => format!("d:{}", when.timestamp_millis()),
        Bson::Null => "z:null".to_owned(),
        ref other => format!("j:{}", json::bson_to_json(other)),
    }
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Store> {
        Store::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Store> {
        Store::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Store> {
        conn.execute_batch(SCHEMA)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn acquire(&self) -> Result<MutexGuard<Connection>> {
        self.conn.lock().map_err(Error::from)
    }

    pub fn collection_id(&self, db: &str, name: &str) -> Result<Option<i64>> {
        let conn = self.acquire()?;
        let id = conn
            .query_row(
                "SELECT id FROM collections WHERE db = ?1 AND name = ?2",
                params![db, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn ensure_collection(&self, db: &str, name: &str) -> Result<i64> {
        let conn = self.acquire()?;
        conn.execute(
            "INSERT OR IGNORE INTO collections (db, name) VALUES (?1, ?2)",
            params![db, name],
        )?;
        let id = conn.query_row(
            "SELECT id FROM collections WHERE db = ?1 AND name = ?2",
            params![db, name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn collection_names(&self, db: &str) -> Result<Vec<String>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare("SELECT name FROM collections WHERE db = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![db], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for name in rows {
            names.push(name?);
        }
        Ok(names)
    }

    /// Runs a scan and decodes every returned payload.
    pub fn scan(&self, collection_id: i64, plan: &ScanPlan) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT data FROM documents WHERE collection_id = ?");
        for clause in &plan.clauses {
            sql.push_str(" AND ");
            sql.push_str(clause);
        }
        sql.push_str(" ORDER BY ");
        if let Some(ref hint) = plan.order_hint {
            sql.push_str(hint);
            sql.push_str(", ");
        }
        sql.push_str("rowid ASC");
        match (plan.limit, plan.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        debug!("scan: {}", sql);

        let payloads = {
            let conn = self.acquire()?;
            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<SqlValue> = Vec::with_capacity(plan.params.len() + 1);
            params.push(SqlValue::Integer(collection_id));
            params.extend(plan.params.iter().cloned());
            let rows = stmt.query_map(params_from_iter(params), |row| row.get::<_, String>(0))?;
            let mut payloads = Vec::new();
            for payload in rows {
                payloads.push(payload?);
            }
            payloads
        };

        let mut docs = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            docs.push(json::decode_document(payload)?);
        }
        Ok(docs)
    }

    /// Inserts a row. Returns `false` on a key collision so the caller can
    /// raise its duplicate-key error with the right namespace.
    pub fn insert_document(&self, collection_id: i64, key: &str, payload: &str) -> Result<bool> {
        let conn = self.acquire()?;
        let outcome = conn.execute(
            "INSERT INTO documents (collection_id, id, data) VALUES (?1, ?2, ?3)",
            params![collection_id, key, payload],
        );
        match outcome {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(cause, _))
                if cause.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(err) => Err(Error::from(err)),
        }
    }

    pub fn replace_document(&self, collection_id: i64, key: &str, payload: &str) -> Result<usize> {
        let conn = self.acquire()?;
        let changed = conn.execute(
            "UPDATE documents SET data = ?3 WHERE collection_id = ?1 AND id = ?2",
            params![collection_id, key, payload],
        )?;
        Ok(changed)
    }

    pub fn delete_document(&self, collection_id: i64, key: &str) -> Result<usize> {
        let conn = self.acquire()?;
        let deleted = conn.execute(
            "DELETE FROM documents WHERE collection_id = ?1 AND id = ?2",
            params![collection_id, key],
        )?;
        Ok(deleted)
    }

    pub fn count_documents(&self, collection_id: i64) -> Result<i64> {
        let conn = self.acquire()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection_id = ?1",
            params![collection_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn rename_collection(&self, db: &str, name: &str, new_name: &str) -> Result<()> {
        let conn = self.acquire()?;
        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM collections WHERE db = ?1 AND name = ?2",
                params![db, new_name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(Error::OperationError(format!(
                "target collection {}.{} already exists",
                db, new_name
            )));
        }
        let renamed = conn.execute(
            "UPDATE collections SET name = ?3 WHERE db = ?1 AND name = ?2",
            params![db, name, new_name],
        )?;
        if renamed == 0 {
            return Err(Error::OperationError(format!(
                "source collection {}.{} does not exist",
                db, name
            )));
        }
        Ok(())
    }

    pub fn drop_collection(&self, db: &str, name: &str) -> Result<()> {
        let collection_id = match self.collection_id(db, name)? {
            Some(collection_id) => collection_id,
            None => return Ok(()),
        };
        let index_names = self.list_index_names(collection_id)?;
        let conn = self.acquire()?;
        for index_name in index_names {
            conn.execute_batch(&format!(
                "DROP INDEX IF EXISTS {}",
                sqlite_index_name(collection_id, &index_name)
            ))?;
        }
        conn.execute(
            "DELETE FROM documents WHERE collection_id = ?1",
            params![collection_id],
        )?;
        conn.execute(
            "DELETE FROM indexes WHERE collection_id = ?1",
            params![collection_id],
        )?;
        conn.execute("DELETE FROM collections WHERE id = ?1", params![collection_id])?;
        Ok(())
    }

    pub fn drop_database(&self, db: &str) -> Result<()> {
        for name in self.collection_names(db)? {
            self.drop_collection(db, &name)?;
        }
        Ok(())
    }

    /// Records index metadata and, for a single-key index, creates a
    /// best-effort SQLite expression index over the extracted field.
    pub fn create_index(
        &self,
        collection_id: i64,
        name: &str,
        key_spec: &Document,
        unique: bool,
    ) -> Result<()> {
        let spec_payload = json::encode_document(key_spec)?;
        let conn = self.acquire()?;
        conn.execute(
            "INSERT OR REPLACE INTO indexes (collection_id, name, key_spec, unique_flag) \
             VALUES (?1, ?2, ?3, ?4)",
            params![collection_id, name, spec_payload, unique as i64],
        )?;
        if key_spec.len() == 1 {
            let field = key_spec.keys().next().unwrap();
            if is_plain_identifier(field) {
                conn.execute_batch(&format!(
                    "CREATE INDEX IF NOT EXISTS {} ON documents (json_extract(data, '$.{}')) \
                     WHERE collection_id = {}",
                    sqlite_index_name(collection_id, name),
                    field,
                    collection_id
                ))?;
            }
        }
        Ok(())
    }

    pub fn list_indexes(&self, collection_id: i64) -> Result<Vec<(String, Document, bool)>> {
        let conn = self.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT name, key_spec, unique_flag FROM indexes WHERE collection_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![collection_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? != 0,
            ))
        })?;
        let mut indexes = Vec::new();
        for row in rows {
            let (name, spec_payload, unique) = row?;
            indexes.push((name, json::decode_document(&spec_payload)?, unique));
        }
        Ok(indexes)
    }

    fn list_index_names(&self, collection_id: i64) -> Result<Vec<String>> {
        Ok(self
            .list_indexes(collection_id)?
            .into_iter()
            .map(|(name, _, _)| name)
            .collect())
    }

    pub fn drop_index(&self, collection_id: i64, name: &str) -> Result<bool> {
        let conn = self.acquire()?;
        conn.execute_batch(&format!(
            "DROP INDEX IF EXISTS {}",
            sqlite_index_name(collection_id, name)
        ))?;
        let removed = conn.execute(
            "DELETE FROM indexes WHERE collection_id = ?1 AND name = ?2",
            params![collection_id, name],
        )?;
        Ok(removed > 0)
    }
}

fn sqlite_index_name(collection_id: i64, index_name: &str) -> String {
    let sanitized: String = index_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("docidx_{}_{}", collection_id, sanitized)
}
