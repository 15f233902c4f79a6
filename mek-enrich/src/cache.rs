//! Persistent source cache
//!
//! One row per `(source, lookup_key)` holding the serialized `PartialRecord`,
//! failed lookups included (negative entries). Each `put` is a single upsert
//! committed before it returns, so an aborted run loses at most the call in
//! flight and never leaves a partial row behind.
//!
//! Negative entries can be bypassed: by age (`negative_ttl`), for a whole run
//! (`CacheMode::RefreshFailed`), or removed with `clear_negative`.

use crate::error::EnrichError;
use crate::types::{PartialRecord, SourceKind};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache file name inside the root folder
pub const CACHE_FILE_NAME: &str = "cache.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS source_cache (
    source      TEXT    NOT NULL,
    lookup_key  TEXT    NOT NULL,
    success     INTEGER NOT NULL,
    record_json TEXT    NOT NULL,
    fetched_at  TEXT    NOT NULL,
    PRIMARY KEY (source, lookup_key)
)
"#;

/// How reads are served for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve every entry (negative entries subject to TTL)
    #[default]
    Normal,
    /// Ignore all entries; results are still written
    RefreshAll,
    /// Ignore negative entries only
    RefreshFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CachePolicy {
    pub mode: CacheMode,
    /// Negative entries older than this are re-fetched
    pub negative_ttl: Option<chrono::Duration>,
}

/// Outcome of a policy-aware read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Usable entry, flagged `from_cache`
    Hit(PartialRecord),
    /// Entry exists but the policy says re-fetch
    Stale,
    Miss,
}

pub struct CacheStore {
    pool: SqlitePool,
    policy: CachePolicy,
    max_lock_wait: Duration,
}

impl CacheStore {
    /// Open (or create) the cache file
    pub async fn open(path: &Path, policy: CachePolicy) -> Result<Self, EnrichError> {
        let pool = mek_common::db::init_sqlite_pool(path, 4)
            .await
            .map_err(|e| EnrichError::CacheIo(format!("open {}: {}", path.display(), e)))?;
        let store = Self::with_pool(pool, policy).await?;
        info!(path = %path.display(), entries = store.len().await?, "Source cache opened");
        Ok(store)
    }

    /// Private in-memory cache (tests, dry runs)
    pub async fn open_in_memory(policy: CachePolicy) -> Result<Self, EnrichError> {
        let pool = mek_common::db::init_memory_pool()
            .await
            .map_err(|e| EnrichError::CacheIo(e.to_string()))?;
        Self::with_pool(pool, policy).await
    }

    async fn with_pool(pool: SqlitePool, policy: CachePolicy) -> Result<Self, EnrichError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            policy,
            max_lock_wait: DEFAULT_MAX_LOCK_WAIT,
        })
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Raw read, ignoring the policy
    pub async fn get(&self, source: SourceKind, key: &str) -> Result<Option<PartialRecord>, EnrichError> {
        let row = sqlx::query("SELECT record_json FROM source_cache WHERE source = ? AND lookup_key = ?")
            .bind(source.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.try_get("record_json")?;
                let record: PartialRecord = serde_json::from_str(&json)
                    .map_err(|e| EnrichError::CacheIo(format!("corrupt entry {}/{}: {}", source, key, e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Policy-aware read. Read failures degrade to a miss.
    pub async fn lookup(&self, source: SourceKind, key: &str) -> CacheLookup {
        self.lookup_at(source, key, Utc::now()).await
    }

    pub async fn lookup_at(&self, source: SourceKind, key: &str, now: DateTime<Utc>) -> CacheLookup {
        if self.policy.mode == CacheMode::RefreshAll {
            return CacheLookup::Stale;
        }

        let record = match self.get(source, key).await {
            Ok(Some(record)) => record,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => {
                warn!(source = %source, lookup_key = key, error = %e, "Cache read failed, treating as miss");
                return CacheLookup::Miss;
            }
        };

        if !record.success {
            if self.policy.mode == CacheMode::RefreshFailed {
                return CacheLookup::Stale;
            }
            if let Some(ttl) = self.policy.negative_ttl {
                if now.signed_duration_since(record.fetched_at) > ttl {
                    debug!(source = %source, lookup_key = key, "Negative cache entry expired");
                    return CacheLookup::Stale;
                }
            }
        }

        CacheLookup::Hit(record.into_cached())
    }

    /// Durable upsert of one record (overwrites the same key)
    pub async fn put(&self, record: &PartialRecord) -> Result<(), EnrichError> {
        let mut stored = record.clone();
        stored.from_cache = false;
        let json = serde_json::to_string(&stored)?;
        let source = record.source.as_str();
        let fetched_at = record.fetched_at.to_rfc3339();

        retry_on_lock("cache put", self.max_lock_wait, || async {
            sqlx::query(
                r#"
                INSERT INTO source_cache (source, lookup_key, success, record_json, fetched_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(source, lookup_key) DO UPDATE SET
                    success = excluded.success,
                    record_json = excluded.record_json,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(source)
            .bind(&record.lookup_key)
            .bind(record.success)
            .bind(&json)
            .bind(&fetched_at)
            .execute(&self.pool)
            .await?;
            Ok::<(), mek_common::Error>(())
        })
        .await
        .map_err(|e| EnrichError::CacheIo(format!("put {}/{}: {}", source, record.lookup_key, e)))
    }

    /// Remove one entry; true when something was removed
    pub async fn invalidate(&self, source: SourceKind, key: &str) -> Result<bool, EnrichError> {
        let result = sqlx::query("DELETE FROM source_cache WHERE source = ? AND lookup_key = ?")
            .bind(source.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove negative entries, for one source or all
    pub async fn clear_negative(&self, source: Option<SourceKind>) -> Result<u64, EnrichError> {
        let result = match source {
            Some(source) => {
                sqlx::query("DELETE FROM source_cache WHERE success = 0 AND source = ?")
                    .bind(source.as_str())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM source_cache WHERE success = 0")
                    .execute(&self.pool)
                    .await?
            }
        };
        info!(removed = result.rows_affected(), "Cleared negative cache entries");
        Ok(result.rows_affected())
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<u64, EnrichError> {
        let result = sqlx::query("DELETE FROM source_cache").execute(&self.pool).await?;
        info!(removed = result.rows_affected(), "Cleared source cache");
        Ok(result.rows_affected())
    }

    pub async fn len(&self) -> Result<u64, EnrichError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, EnrichError> {
        Ok(self.len().await? == 0)
    }

    /// Checkpoint the WAL and close all connections
    pub async fn close(self) {
        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await {
            debug!(error = %e, "WAL checkpoint skipped");
        }
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{put_text, CanonicalField, FieldMap, Identifier, Lookup, SourceErrorKind};
    use tempfile::TempDir;

    fn success_record(key: &str) -> PartialRecord {
        let mut fields = FieldMap::new();
        put_text(&mut fields, CanonicalField::Formula, "C2H5NO2");
        PartialRecord {
            source: SourceKind::Hmdb,
            identifier: Some(Identifier::hmdb(key)),
            lookup_key: key.to_string(),
            fields,
            success: true,
            elapsed_ms: 120,
            from_cache: false,
            error: None,
            error_message: None,
            fetched_at: Utc::now(),
        }
    }

    fn failed_record(key: &str) -> PartialRecord {
        PartialRecord::failed(
            SourceKind::PubChem,
            &Lookup::by_name(key),
            SourceErrorKind::Timeout,
            "timed out",
            30_000,
        )
    }

    #[tokio::test]
    async fn test_put_then_hit_is_flagged_cached() {
        let cache = CacheStore::open_in_memory(CachePolicy::default()).await.unwrap();
        cache.put(&success_record("HMDB0000123")).await.unwrap();

        match cache.lookup(SourceKind::Hmdb, "HMDB0000123").await {
            CacheLookup::Hit(record) => {
                assert!(record.from_cache);
                assert_eq!(record.elapsed_ms, 0);
                assert!(record.success);
            }
            other => panic!("expected hit, got {:?}", other),
        }
        assert_eq!(cache.lookup(SourceKind::PubChem, "HMDB0000123").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_negative_entries_served_in_normal_mode() {
        let cache = CacheStore::open_in_memory(CachePolicy::default()).await.unwrap();
        cache.put(&failed_record("mystery")).await.unwrap();

        match cache.lookup(SourceKind::PubChem, "mystery").await {
            CacheLookup::Hit(record) => {
                assert!(!record.success);
                assert_eq!(record.error, Some(SourceErrorKind::Timeout));
            }
            other => panic!("expected negative hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_failed_bypasses_negative_only() {
        let policy = CachePolicy {
            mode: CacheMode::RefreshFailed,
            negative_ttl: None,
        };
        let cache = CacheStore::open_in_memory(policy).await.unwrap();
        cache.put(&failed_record("mystery")).await.unwrap();
        cache.put(&success_record("HMDB0000123")).await.unwrap();

        assert_eq!(cache.lookup(SourceKind::PubChem, "mystery").await, CacheLookup::Stale);
        assert!(matches!(
            cache.lookup(SourceKind::Hmdb, "HMDB0000123").await,
            CacheLookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn test_refresh_all_bypasses_everything() {
        let policy = CachePolicy {
            mode: CacheMode::RefreshAll,
            negative_ttl: None,
        };
        let cache = CacheStore::open_in_memory(policy).await.unwrap();
        cache.put(&success_record("HMDB0000123")).await.unwrap();
        assert_eq!(cache.lookup(SourceKind::Hmdb, "HMDB0000123").await, CacheLookup::Stale);
    }

    #[tokio::test]
    async fn test_negative_ttl_expiry() {
        let policy = CachePolicy {
            mode: CacheMode::Normal,
            negative_ttl: Some(chrono::Duration::hours(24)),
        };
        let cache = CacheStore::open_in_memory(policy).await.unwrap();
        cache.put(&failed_record("mystery")).await.unwrap();

        let soon = Utc::now() + chrono::Duration::hours(1);
        assert!(matches!(
            cache.lookup_at(SourceKind::PubChem, "mystery", soon).await,
            CacheLookup::Hit(_)
        ));

        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(
            cache.lookup_at(SourceKind::PubChem, "mystery", later).await,
            CacheLookup::Stale
        );
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_negative() {
        let cache = CacheStore::open_in_memory(CachePolicy::default()).await.unwrap();
        cache.put(&success_record("HMDB0000123")).await.unwrap();
        cache.put(&failed_record("mystery")).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 2);

        assert_eq!(cache.clear_negative(Some(SourceKind::Hmdb)).await.unwrap(), 0);
        assert_eq!(cache.clear_negative(None).await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 1);

        assert!(cache.invalidate(SourceKind::Hmdb, "HMDB0000123").await.unwrap());
        assert!(!cache.invalidate(SourceKind::Hmdb, "HMDB0000123").await.unwrap());
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites_same_key() {
        let cache = CacheStore::open_in_memory(CachePolicy::default()).await.unwrap();
        let mut record = failed_record("glycine");
        cache.put(&record).await.unwrap();

        record.success = true;
        record.error = None;
        put_text(&mut record.fields, CanonicalField::Formula, "C2H5NO2");
        cache.put(&record).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 1);
        let stored = cache.get(SourceKind::PubChem, "glycine").await.unwrap().unwrap();
        assert!(stored.success);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CACHE_FILE_NAME);

        let cache = CacheStore::open(&path, CachePolicy::default()).await.unwrap();
        cache.put(&success_record("HMDB0000123")).await.unwrap();
        cache.close().await;

        let reopened = CacheStore::open(&path, CachePolicy::default()).await.unwrap();
        let record = reopened.get(SourceKind::Hmdb, "HMDB0000123").await.unwrap().unwrap();
        assert_eq!(record.lookup_key, "HMDB0000123");
        assert!(!record.from_cache);
    }

    #[tokio::test]
    async fn test_clear_removes_all() {
        let cache = CacheStore::open_in_memory(CachePolicy::default()).await.unwrap();
        cache.put(&success_record("HMDB0000123")).await.unwrap();
        cache.put(&failed_record("mystery")).await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.is_empty().await.unwrap());
    }
}
