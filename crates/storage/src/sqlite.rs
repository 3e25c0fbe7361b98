//! Durable SQLite backend.
//!
//! One table keyed by `(visitor_id, scope, name)`. Every write is a single
//! `INSERT ... ON CONFLICT DO UPDATE`, so concurrent writers of the same key
//! never lose updates; migrations run inside an explicit transaction.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use targeting_core::{StorageBackend, StorageConfig, VisitorInfo};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::storage::{
    check_entry_name, decode_value, encode_value, require_visitor, resolve_visitor,
    MigrationSnapshot, TargetingStorage, META_KEY,
};
use crate::timestamps::{self, from_micros, to_micros, BucketTimestamps};

const MAX_TABLE_NAME_LEN: usize = 63;

fn validate_table_name(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_TABLE_NAME_LEN
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StorageError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// SQL text for one table, built once at construction.
struct Statements {
    upsert: String,
    touch_meta: String,
    select_all: String,
    select_one: String,
    exists: String,
    delete_one: String,
    delete_scope: String,
    delete_visitor: String,
    timestamps: String,
    count: String,
}

impl Statements {
    fn new(table: &str) -> Self {
        Self {
            upsert: format!(
                "INSERT INTO {table} (visitor_id, scope, name, value, creation_date, modification_date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (visitor_id, scope, name) DO UPDATE SET \
                 value = excluded.value, \
                 creation_date = MIN({table}.creation_date, excluded.creation_date), \
                 modification_date = MAX({table}.modification_date, excluded.modification_date)"
            ),
            touch_meta: format!(
                "UPDATE {table} SET modification_date = MAX(modification_date, ?4) \
                 WHERE visitor_id = ?1 AND scope = ?2 AND name = ?3"
            ),
            select_all: format!(
                "SELECT name, value FROM {table} WHERE visitor_id = ?1 AND scope = ?2 AND name != ?3"
            ),
            select_one: format!(
                "SELECT value FROM {table} WHERE visitor_id = ?1 AND scope = ?2 AND name = ?3"
            ),
            exists: format!(
                "SELECT EXISTS (SELECT 1 FROM {table} WHERE visitor_id = ?1 AND scope = ?2 AND name = ?3)"
            ),
            delete_one: format!(
                "DELETE FROM {table} WHERE visitor_id = ?1 AND scope = ?2 AND name = ?3"
            ),
            delete_scope: format!("DELETE FROM {table} WHERE visitor_id = ?1 AND scope = ?2"),
            delete_visitor: format!("DELETE FROM {table} WHERE visitor_id = ?1"),
            timestamps: format!(
                "SELECT MIN(creation_date), MAX(modification_date) FROM {table} \
                 WHERE visitor_id = ?1 AND scope = ?2"
            ),
            count: format!("SELECT COUNT(*) FROM {table}"),
        }
    }
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    sql: Statements,
}

impl SqliteStorage {
    /// Open (or create) the database file named in the config.
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        info!(path = %config.sqlite_path, table = %config.table_name, "Opening SQLite targeting storage");
        let conn = Connection::open(Path::new(&config.sqlite_path))?;
        Self::from_connection(conn, &config.table_name)
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn in_memory(table: &str) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, table)
    }

    /// Use an existing connection; creates the table if needed.
    pub fn from_connection(conn: Connection, table: &str) -> StorageResult<Self> {
        validate_table_name(table)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                visitor_id        TEXT    NOT NULL,
                scope             TEXT    NOT NULL,
                name              TEXT    NOT NULL,
                value             TEXT    NOT NULL,
                creation_date     INTEGER NOT NULL,
                modification_date INTEGER NOT NULL,
                PRIMARY KEY (visitor_id, scope, name)
            );"
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
            sql: Statements::new(table),
        })
    }

    /// Total number of rows, meta rows included.
    pub fn row_count(&self) -> StorageResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&self.sql.count, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn write_snapshot(
        &self,
        tx: &Transaction<'_>,
        visitor_id: &str,
        scope: &str,
        snapshot: &MigrationSnapshot,
    ) -> StorageResult<()> {
        let created = to_micros(snapshot.timestamps.created);
        let updated = to_micros(snapshot.timestamps.updated);
        let mut upsert = tx.prepare_cached(&self.sql.upsert)?;
        for (name, value) in &snapshot.entries {
            upsert.execute(params![visitor_id, scope, name, value, created, updated])?;
        }
        upsert.execute(params![
            visitor_id,
            scope,
            META_KEY,
            Value::Null.to_string(),
            created,
            updated
        ])?;
        Ok(())
    }
}

impl TargetingStorage for SqliteStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    fn all(&self, visitor: &VisitorInfo, scope: &str) -> StorageResult<HashMap<String, Value>> {
        let Some(visitor_id) = resolve_visitor(visitor, "all") else {
            return Ok(HashMap::new());
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&self.sql.select_all)?;
        let rows = stmt.query_map(params![visitor_id, scope, META_KEY], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = HashMap::new();
        for row in rows {
            let (name, raw) = row?;
            if let Some(value) = decode_value(&raw, &name) {
                entries.insert(name, value);
            }
        }
        Ok(entries)
    }

    fn has(&self, visitor: &VisitorInfo, scope: &str, name: &str) -> StorageResult<bool> {
        let Some(visitor_id) = resolve_visitor(visitor, "has") else {
            return Ok(false);
        };
        if name == META_KEY {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let exists: bool =
            conn.query_row(&self.sql.exists, params![visitor_id, scope, name], |row| {
                row.get(0)
            })?;
        Ok(exists)
    }

    fn get(
        &self,
        visitor: &VisitorInfo,
        scope: &str,
        name: &str,
        default: Value,
    ) -> StorageResult<Value> {
        let Some(visitor_id) = resolve_visitor(visitor, "get") else {
            return Ok(default);
        };
        if name == META_KEY {
            return Ok(default);
        }
        let raw: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(&self.sql.select_one, params![visitor_id, scope, name], |row| {
                row.get(0)
            })
            .optional()?
        };

        match raw.as_deref().and_then(|raw| decode_value(raw, name)) {
            Some(value) => {
                metrics::counter!("storage.hit", "backend" => "sqlite").increment(1);
                Ok(value)
            }
            None => {
                metrics::counter!("storage.miss", "backend" => "sqlite").increment(1);
                debug!(visitor_id = visitor_id, scope = scope, name = name, "Storage miss");
                Ok(default)
            }
        }
    }

    fn set(
        &self,
        visitor: &VisitorInfo,
        scope: &str,
        name: &str,
        value: &Value,
    ) -> StorageResult<()> {
        check_entry_name(name)?;
        let Some(visitor_id) = resolve_visitor(visitor, "set") else {
            return Ok(());
        };
        let encoded = encode_value(value)?;
        let now = to_micros(timestamps::now());

        // Entry and meta row move together; dropping an uncommitted tx rolls back.
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.prepare_cached(&self.sql.upsert)?
            .execute(params![visitor_id, scope, name, encoded, now, now])?;
        tx.prepare_cached(&self.sql.touch_meta)?
            .execute(params![visitor_id, scope, META_KEY, now])?;
        tx.commit()?;
        metrics::counter!("storage.write", "backend" => "sqlite").increment(1);
        Ok(())
    }

    fn remove(&self, visitor: &VisitorInfo, scope: &str, name: &str) -> StorageResult<()> {
        check_entry_name(name)?;
        let Some(visitor_id) = resolve_visitor(visitor, "remove") else {
            return Ok(());
        };
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx
            .prepare_cached(&self.sql.delete_one)?
            .execute(params![visitor_id, scope, name])?;
        if removed > 0 {
            let now = to_micros(timestamps::now());
            tx.prepare_cached(&self.sql.touch_meta)?
                .execute(params![visitor_id, scope, META_KEY, now])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self, visitor: &VisitorInfo, scope: Option<&str>) -> StorageResult<()> {
        let Some(visitor_id) = resolve_visitor(visitor, "clear") else {
            return Ok(());
        };
        let conn = self.conn.lock();
        let removed = match scope {
            Some(scope) => conn.execute(&self.sql.delete_scope, params![visitor_id, scope])?,
            None => conn.execute(&self.sql.delete_visitor, params![visitor_id])?,
        };
        debug!(visitor_id = visitor_id, scope = ?scope, removed = removed, "SQLite storage cleared");
        Ok(())
    }

    fn timestamps(
        &self,
        visitor: &VisitorInfo,
        scope: &str,
    ) -> StorageResult<Option<BucketTimestamps>> {
        let Some(visitor_id) = resolve_visitor(visitor, "timestamps") else {
            return Ok(None);
        };
        let conn = self.conn.lock();
        let (created, updated): (Option<i64>, Option<i64>) =
            conn.query_row(&self.sql.timestamps, params![visitor_id, scope], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
        Ok(match (created.and_then(from_micros), updated.and_then(from_micros)) {
            (Some(created), Some(updated)) => Some(BucketTimestamps::new(created, updated)),
            _ => None,
        })
    }

    fn migrate_from(
        &self,
        source: &dyn TargetingStorage,
        visitor: &VisitorInfo,
        scope: &str,
    ) -> StorageResult<()> {
        let visitor_id = require_visitor(visitor, "migration")?;
        // Read the source before locking: it may be this very storage.
        let Some(snapshot) = MigrationSnapshot::collect(source, visitor, scope)? else {
            debug!(visitor_id = visitor_id, scope = scope, "Nothing to migrate");
            return Ok(());
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if let Err(err) = self.write_snapshot(&tx, visitor_id, scope, &snapshot) {
            if let Err(rollback_err) = tx.rollback() {
                warn!(error = %rollback_err, "Rollback of failed migration also failed");
            }
            metrics::counter!("storage.migration.failed", "backend" => "sqlite").increment(1);
            return Err(err);
        }
        tx.commit()?;

        metrics::counter!("storage.migration", "backend" => "sqlite").increment(1);
        info!(
            visitor_id = visitor_id,
            scope = scope,
            entries = snapshot.entries.len(),
            source = %source.backend(),
            "Migrated targeting storage"
        );
        Ok(())
    }
}
