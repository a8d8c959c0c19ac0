//! Indexed backend on SQLite.
//!
//! Records are stored as JSON bodies keyed by `(collection, id)`; declared
//! indexes are materialized into `index_entries` on every put, so lookups are
//! exact-match reads on a covering primary key.

use super::schema::{self, Collection};
use super::StorageBackend;
use crate::error::AppError;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DB_FILE_NAME: &str = "tact.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS index_entries (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    key TEXT NOT NULL,
    id TEXT NOT NULL,
    PRIMARY KEY (collection, index_name, key, id)
);
CREATE INDEX IF NOT EXISTS index_entries_by_record ON index_entries (collection, id);
";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::storage_unavailable(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::io("storage connection poisoned"))?;
            op(&mut guard)
        })
        .await
        .map_err(|err| AppError::io(format!("storage task failed: {err}")))?
    }
}

fn unavailable(err: rusqlite::Error) -> AppError {
    AppError::storage_unavailable(err.to_string())
}

fn io(err: rusqlite::Error) -> AppError {
    AppError::io(err.to_string())
}

fn parse_body(body: String) -> Result<Value, AppError> {
    serde_json::from_str(&body).map_err(AppError::from)
}

fn collect_bodies(
    rows: impl Iterator<Item = rusqlite::Result<String>>,
) -> Result<Vec<Value>, AppError> {
    let mut records = Vec::new();
    for body in rows {
        records.push(parse_body(body.map_err(io)?)?);
    }
    Ok(records)
}

#[async_trait]
impl StorageBackend for SqliteStore {
    async fn put(&self, collection: Collection, record: Value) -> Result<(), AppError> {
        let id = schema::record_id(&record)?.to_string();
        let body = serde_json::to_string(&record)?;
        let mut entries = Vec::new();
        for def in collection.indexes() {
            for key in schema::index_keys(def, &record) {
                entries.push((def.name, schema::encode_key(&key)));
            }
        }

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(io)?;
            tx.execute(
                "INSERT OR REPLACE INTO records (collection, id, body) VALUES (?1, ?2, ?3)",
                params![collection.as_str(), id, body],
            )
            .map_err(io)?;
            tx.execute(
                "DELETE FROM index_entries WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )
            .map_err(io)?;
            for (index_name, key) in &entries {
                tx.execute(
                    "INSERT OR IGNORE INTO index_entries (collection, index_name, key, id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![collection.as_str(), index_name, key, id],
                )
                .map_err(io)?;
            }
            tx.commit().map_err(io)?;
            debug!(%collection, %id, "record stored");
            Ok(())
        })
        .await
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, AppError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                    params![collection.as_str(), id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(io)?;
            body.map(parse_body).transpose()
        })
        .await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), AppError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(io)?;
            tx.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )
            .map_err(io)?;
            tx.execute(
                "DELETE FROM index_entries WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )
            .map_err(io)?;
            tx.commit().map_err(io)
        })
        .await
    }

    async fn all(&self, collection: Collection) -> Result<Vec<Value>, AppError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY id")
                .map_err(io)?;
            let rows = stmt
                .query_map(params![collection.as_str()], |row| row.get::<_, String>(0))
                .map_err(io)?;
            collect_bodies(rows)
        })
        .await
    }

    async fn query_by_index(
        &self,
        collection: Collection,
        index: &str,
        key: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let def = collection.index(index)?;
        let index_name = def.name;
        let key = schema::encode_key(key);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT r.body FROM index_entries e
                     JOIN records r ON r.collection = e.collection AND r.id = e.id
                     WHERE e.collection = ?1 AND e.index_name = ?2 AND e.key = ?3
                     ORDER BY r.id",
                )
                .map_err(io)?;
            let rows = stmt
                .query_map(params![collection.as_str(), index_name, key], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(io)?;
            collect_bodies(rows)
        })
        .await
    }

    async fn clear(&self, collection: Collection) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(io)?;
            tx.execute(
                "DELETE FROM records WHERE collection = ?1",
                params![collection.as_str()],
            )
            .map_err(io)?;
            tx.execute(
                "DELETE FROM index_entries WHERE collection = ?1",
                params![collection.as_str()],
            )
            .map_err(io)?;
            tx.commit().map_err(io)
        })
        .await
    }
}
