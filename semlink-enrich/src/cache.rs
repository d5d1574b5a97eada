//! Persistent payload cache
//!
//! One SQLite file per (data source, language): `<cache_dir>/<lang>/<source>_cache.db`
//! with a single `cache(key, payload)` table. Entries are never evicted.
//! Workers own disjoint keys within a pass, so concurrent `put`s never
//! collide on a key; SQLite in WAL mode serializes the writes.

use crate::error::EnrichResult;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;

/// Durable key → raw payload store
#[derive(Debug, Clone)]
pub struct PayloadCache {
    pool: SqlitePool,
}

impl PayloadCache {
    /// Open (creating if needed) the cache for `source` in `langcode`
    pub async fn open(cache_dir: &Path, langcode: &str, source: &str) -> EnrichResult<Self> {
        let dir = cache_dir.join(langcode);
        std::fs::create_dir_all(&dir).map_err(semlink_common::Error::from)?;
        let db_path = dir.join(format!("{}_cache.db", source));

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        debug!(langcode, source, path = %db_path.display(), "Opened payload cache");
        Self::with_pool(pool).await
    }

    /// Non-persistent cache for tests and one-shot runs
    pub async fn open_in_memory() -> EnrichResult<Self> {
        // Every connection to :memory: is a separate database; keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> EnrichResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn get(&self, key: &str) -> EnrichResult<Option<String>> {
        let payload: Option<String> = sqlx::query_scalar("SELECT payload FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payload)
    }

    pub async fn put(&self, key: &str, payload: &str) -> EnrichResult<()> {
        sqlx::query("INSERT OR REPLACE INTO cache (key, payload) VALUES (?, ?)")
            .bind(key)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> EnrichResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cache WHERE key = ?)")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    pub async fn len(&self) -> EnrichResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// Flush the write-ahead log into the main database file
    pub async fn sync(&self) -> EnrichResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(FULL)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flush and close all connections
    pub async fn close(&self) -> EnrichResult<()> {
        self.sync().await?;
        self.pool.close().await;
        Ok(())
    }
}
