//! Persistent tier: one row per `(kind, identifier)`.
//!
//! The store is a write-through mirror, never a source of truth. It is read once at startup
//! to warm the in-memory tier; afterwards it only receives writes.

use super::types::{EntityKind, TtlClass};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{path::Path, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record {kind}/{identifier}: {reason}")]
    Corrupt { kind: String, identifier: String, reason: String },
}

/// A cache entry as it is laid out on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub kind: EntityKind,
    pub identifier: String,
    /// JSON text of the cached value.
    pub payload: String,
    pub ttl_class: TtlClass,
    pub ttl_secs: Option<u64>,
    pub height: Option<u64>,
    /// Wall clock of the fetch, in unix milliseconds.
    pub fetched_at_ms: i64,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<StoredRecord>, CacheStoreError>;

    async fn get(&self, kind: EntityKind, identifier: &str) -> Result<Option<StoredRecord>, CacheStoreError>;

    /// Inserts or replaces the record for its `(kind, identifier)`.
    async fn put(&self, record: &StoredRecord) -> Result<(), CacheStoreError>;

    async fn remove(&self, kind: EntityKind, identifier: &str) -> Result<(), CacheStoreError>;

    /// Deletes block-scoped records tied to a height `>= height`. Returns the number removed.
    async fn remove_from_height(&self, height: u64) -> Result<u64, CacheStoreError>;

    /// Deletes records whose TTL elapsed at or before `now_ms`. Returns the number removed.
    async fn remove_expired(&self, now_ms: i64) -> Result<u64, CacheStoreError>;

    async fn clear(&self) -> Result<(), CacheStoreError>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    kind TEXT NOT NULL,
    identifier TEXT NOT NULL,
    payload TEXT NOT NULL,
    ttl_class TEXT NOT NULL,
    ttl_secs INTEGER,
    height INTEGER,
    fetched_at_ms INTEGER NOT NULL,
    PRIMARY KEY (kind, identifier)
)";

const HEIGHT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_height ON cache_entries (height)";

pub struct SqliteCacheStore {
    pool: Pool<Sqlite>,
}

impl SqliteCacheStore {
    /// Opens (creating if needed) the cache database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheStoreError::Database`] if the file cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self, CacheStoreError> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        Self::connect(options).await
    }

    /// Opens a store from a sqlx connection string, e.g. `sqlite::memory:`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheStoreError::Database`] on an invalid URL or connection failure.
    pub async fn from_url(url: &str) -> Result<Self, CacheStoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, CacheStoreError> {
        // A single connection: the store has one writer, and in-memory databases are
        // per-connection.
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query(HEIGHT_INDEX).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn row_to_record(row: &SqliteRow) -> Result<StoredRecord, CacheStoreError> {
        let kind: String = row.try_get("kind")?;
        let identifier: String = row.try_get("identifier")?;
        let ttl_class: String = row.try_get("ttl_class")?;
        let corrupt = |reason: String| CacheStoreError::Corrupt {
            kind: kind.clone(),
            identifier: identifier.clone(),
            reason,
        };

        let parsed_kind =
            EntityKind::parse(&kind).ok_or_else(|| corrupt(format!("unknown kind '{kind}'")))?;
        let parsed_class = TtlClass::parse(&ttl_class)
            .ok_or_else(|| corrupt(format!("unknown ttl class '{ttl_class}'")))?;
        let ttl_secs = row
            .try_get::<Option<i64>, _>("ttl_secs")?
            .map(|v| u64::try_from(v).map_err(|e| corrupt(format!("ttl_secs {v}: {e}"))))
            .transpose()?;
        let height = row
            .try_get::<Option<i64>, _>("height")?
            .map(|v| u64::try_from(v).map_err(|e| corrupt(format!("height {v}: {e}"))))
            .transpose()?;

        Ok(StoredRecord {
            kind: parsed_kind,
            payload: row.try_get("payload")?,
            ttl_class: parsed_class,
            ttl_secs,
            height,
            fetched_at_ms: row.try_get("fetched_at_ms")?,
            identifier,
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn load_all(&self) -> Result<Vec<StoredRecord>, CacheStoreError> {
        let rows = sqlx::query(
            "SELECT kind, identifier, payload, ttl_class, ttl_secs, height, fetched_at_ms
             FROM cache_entries ORDER BY fetched_at_ms ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_record(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable cache record"),
            }
        }
        Ok(records)
    }

    async fn get(&self, kind: EntityKind, identifier: &str) -> Result<Option<StoredRecord>, CacheStoreError> {
        let row = sqlx::query(
            "SELECT kind, identifier, payload, ttl_class, ttl_secs, height, fetched_at_ms
             FROM cache_entries WHERE kind = ? AND identifier = ?",
        )
        .bind(kind.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn put(&self, record: &StoredRecord) -> Result<(), CacheStoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries
             (kind, identifier, payload, ttl_class, ttl_secs, height, fetched_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.kind.as_str())
        .bind(&record.identifier)
        .bind(&record.payload)
        .bind(record.ttl_class.as_str())
        .bind(record.ttl_secs.map(to_i64))
        .bind(record.height.map(to_i64))
        .bind(record.fetched_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, kind: EntityKind, identifier: &str) -> Result<(), CacheStoreError> {
        sqlx::query("DELETE FROM cache_entries WHERE kind = ? AND identifier = ?")
            .bind(kind.as_str())
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_from_height(&self, height: u64) -> Result<u64, CacheStoreError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries
             WHERE height IS NOT NULL AND height >= ? AND kind IN (?, ?, ?)",
        )
        .bind(to_i64(height))
        .bind(EntityKind::Block.as_str())
        .bind(EntityKind::Transaction.as_str())
        .bind(EntityKind::Address.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn remove_expired(&self, now_ms: i64) -> Result<u64, CacheStoreError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries
             WHERE ttl_secs IS NOT NULL AND fetched_at_ms + ttl_secs * 1000 <= ?",
        )
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<(), CacheStoreError> {
        sqlx::query("DELETE FROM cache_entries").execute(&self.pool).await?;
        Ok(())
    }
}
