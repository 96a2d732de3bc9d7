//! SQLite-backed weight store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edgepool_abstraction::ModelType;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::error::{CacheError, CacheResult};
use super::store::WeightStore;
use super::types::{CacheEntry, CachedModelInfo};

const LIST_COLUMNS: &str = "model_id, model_type, version, size_bytes, cached_at, last_used";

/// Weight store persisting blobs in a single SQLite table.
///
/// The connection is shared behind a mutex and every statement runs on the
/// blocking pool, so callers on the async runtime never block on disk I/O.
#[derive(Clone)]
pub struct SqliteWeightStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWeightStore {
    /// Opens (or creates) a store at the given database path.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened weight store");
        Self::from_connection(conn)
    }

    /// Opens an in-memory store.
    ///
    /// # Errors
    /// Returns `CacheError::Storage` if schema creation fails.
    pub fn open_in_memory() -> CacheResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> CacheResult<Self> {
        init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Runs a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> CacheResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CacheError::Storage("weight store lock poisoned".to_string()))?;
            op(&guard)
        })
        .await?
    }
}

fn init_schema(conn: &Connection) -> CacheResult<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS weights (
            model_id TEXT PRIMARY KEY,
            model_type TEXT NOT NULL,
            version TEXT NOT NULL,
            weights BLOB NOT NULL,
            size_bytes INTEGER NOT NULL,
            cached_at INTEGER NOT NULL,
            last_used INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_weights_last_used ON weights(last_used);
        ",
    )?;
    Ok(())
}

fn column_error(index: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(index, name.to_string(), rusqlite::types::Type::Text)
}

fn millis_to_datetime(millis: i64, index: usize, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| column_error(index, name))
}

/// Maps a row selected with `LIST_COLUMNS`.
fn row_to_info(row: &Row) -> rusqlite::Result<CachedModelInfo> {
    let model_type: String = row.get(1)?;
    let model_type = model_type.parse::<ModelType>().map_err(|_| column_error(1, "model_type"))?;
    let size_bytes: i64 = row.get(3)?;

    Ok(CachedModelInfo {
        model_id: row.get(0)?,
        model_type,
        version: row.get(2)?,
        size_bytes: u64::try_from(size_bytes).map_err(|_| column_error(3, "size_bytes"))?,
        cached_at: millis_to_datetime(row.get(4)?, 4, "cached_at")?,
        last_used: millis_to_datetime(row.get(5)?, 5, "last_used")?,
    })
}

fn size_to_sql(size: u64) -> CacheResult<i64> {
    i64::try_from(size).map_err(|_| CacheError::Storage(format!("entry size {size} out of range")))
}

#[async_trait]
impl WeightStore for SqliteWeightStore {
    async fn initialize(&self) -> CacheResult<()> {
        self.with_conn(init_schema).await
    }

    async fn get(&self, model_id: &str) -> CacheResult<Option<CacheEntry>> {
        let model_id = model_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {LIST_COLUMNS}, weights FROM weights WHERE model_id = ?1");
            let entry = conn
                .query_row(&sql, params![model_id], |row| {
                    let info = row_to_info(row)?;
                    let weights: Vec<u8> = row.get(6)?;
                    Ok(CacheEntry {
                        model_id: info.model_id,
                        model_type: info.model_type,
                        version: info.version,
                        weights: Bytes::from(weights),
                        size_bytes: info.size_bytes,
                        cached_at: info.cached_at,
                        last_used: info.last_used,
                    })
                })
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn contains(&self, model_id: &str) -> CacheResult<bool> {
        let model_id = model_id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row("SELECT 1 FROM weights WHERE model_id = ?1", params![model_id], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn put(&self, entry: &CacheEntry) -> CacheResult<()> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO weights
                    (model_id, model_type, version, weights, size_bytes, cached_at, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.model_id,
                    entry.model_type.as_str(),
                    entry.version,
                    entry.weights.as_ref(),
                    size_to_sql(entry.size_bytes)?,
                    entry.cached_at.timestamp_millis(),
                    entry.last_used.timestamp_millis(),
                ],
            )?;
            debug!(model_id = %entry.model_id, size_bytes = entry.size_bytes, "Stored weights");
            Ok(())
        })
        .await
    }

    async fn delete(&self, model_id: &str) -> CacheResult<bool> {
        let model_id = model_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM weights WHERE model_id = ?1", params![model_id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self) -> CacheResult<Vec<CachedModelInfo>> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {LIST_COLUMNS} FROM weights ORDER BY last_used ASC, model_id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_info)?;
            let infos = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(infos)
        })
        .await
    }

    async fn oldest(&self) -> CacheResult<Option<CachedModelInfo>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LIST_COLUMNS} FROM weights ORDER BY last_used ASC, model_id ASC LIMIT 1"
            );
            Ok(conn.query_row(&sql, [], row_to_info).optional()?)
        })
        .await
    }

    async fn touch(&self, model_id: &str, last_used: DateTime<Utc>) -> CacheResult<bool> {
        let model_id = model_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE weights SET last_used = ?1 WHERE model_id = ?2",
                params![last_used.timestamp_millis(), model_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn total_size(&self) -> CacheResult<u64> {
        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(size_bytes), 0) FROM weights", [], |row| {
                    row.get(0)
                })?;
            Ok(u64::try_from(total).unwrap_or_default())
        })
        .await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM weights", [])?;
            Ok(())
        })
        .await
    }
}
