//! SQLite-backed store.
//!
//! One `kv` table keyed by `(namespace, key)`. The schema migration is
//! applied inline via `include_str!` when the database is opened.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{KeyValueStore, StoreError, StoreOp};

const UPSERT_SQL: &str = "INSERT INTO kv (namespace, key, value, updated_at) \
     VALUES (?1, ?2, ?3, datetime('now')) \
     ON CONFLICT(namespace, key) DO UPDATE SET \
       value = excluded.value, updated_at = excluded.updated_at";

const DELETE_SQL: &str = "DELETE FROM kv WHERE namespace = ?1 AND key = ?2";

/// Open (or create) the database at `path` and apply the schema.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the database
/// cannot be opened, or the migration fails.
pub async fn open_database(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .pragma("trusted_schema", "OFF");

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    let migration_sql = include_str!("../../migrations/001_warden_schema.sql");
    sqlx::raw_sql(migration_sql)
        .execute(&pool)
        .await
        .context("failed to apply warden schema migration")?;

    Ok(pool)
}

/// Key-value store scoped to one namespace of the `kv` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteStore {
    /// Create a store over `pool` restricted to `namespace`.
    pub fn new(pool: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    /// Namespace this store reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM kv WHERE namespace = ?1 AND key = ?2")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        sqlx::query(UPSERT_SQL)
            .bind(&self.namespace)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(DELETE_SQL)
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                StoreOp::Put { key, value } => {
                    sqlx::query(UPSERT_SQL)
                        .bind(&self.namespace)
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await?;
                }
                StoreOp::Remove { key } => {
                    sqlx::query(DELETE_SQL)
                        .bind(&self.namespace)
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
