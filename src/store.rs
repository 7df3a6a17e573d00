//! Fingerprint store
//!
//! Keyed storage of [`CaptureRecord`]s on top of SQLite. Read-modify-write
//! cycles on one id are serialised by a lock stripe chosen from the id's
//! hash, so contacts for the same visitor never lose an update while
//! contacts for different visitors proceed independently.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::correlator::is_valid_id;
use crate::models::{CaptureRecord, SimpleMetadata, Stage};

const LOCK_STRIPES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("capture {0} not found")]
    NotFound(String),

    #[error("capture {0} already exists")]
    AlreadyExists(String),

    #[error("malformed capture id")]
    InvalidId,

    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("capture {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(FromRow)]
struct CaptureRow {
    seq: i64,
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    source_address: String,
    simple_metadata: Json<SimpleMetadata>,
    deep_metadata: Option<Json<serde_json::Value>>,
    stage: String,
    hit_count: i64,
    fingerprint: String,
}

impl CaptureRow {
    fn into_record(self) -> StoreResult<(i64, CaptureRecord)> {
        let stage: Stage = self.stage.parse().map_err(|reason| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        })?;

        Ok((
            self.seq,
            CaptureRecord {
                id: self.id,
                created_at: self.created_at,
                updated_at: self.updated_at,
                source_address: self.source_address,
                simple_metadata: self.simple_metadata.0,
                deep_metadata: self.deep_metadata.map(|d| d.0),
                stage,
                hit_count: self.hit_count,
                fingerprint: self.fingerprint,
            },
        ))
    }
}

/// Rows that exist but cannot be decoded are corrupt, not an outage
fn decode_error(id: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { index, source } => StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("column {}: {}", index, source),
        },
        e => StoreError::Unavailable(e),
    }
}

#[derive(Clone)]
pub struct FingerprintStore {
    pool: SqlitePool,
    stripes: Arc<[Mutex<()>]>,
}

impl FingerprintStore {
    pub fn new(pool: SqlitePool) -> Self {
        let stripes: Vec<Mutex<()>> = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            pool,
            stripes: stripes.into(),
        }
    }

    async fn lock(&self, id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe].lock().await
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new record; an existing id is an integrity fault
    pub async fn create(&self, record: &CaptureRecord) -> StoreResult<()> {
        if !is_valid_id(&record.id) {
            return Err(StoreError::InvalidId);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO captures (id, created_at, updated_at, source_address, simple_metadata, deep_metadata, stage, hit_count, fingerprint)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.source_address)
        .bind(Json(&record.simple_metadata))
        .bind(record.deep_metadata.as_ref().map(Json))
        .bind(record.stage.as_str())
        .bind(record.hit_count)
        .bind(&record.fingerprint)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: &str) -> StoreResult<CaptureRecord> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId);
        }
        self.fetch(id).await
    }

    async fn fetch(&self, id: &str) -> StoreResult<CaptureRecord> {
        let row = sqlx::query_as::<_, CaptureRow>("SELECT * FROM captures WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| decode_error(id, e))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        row.into_record().map(|(_, record)| record)
    }

    /// Apply `mutator` to the record atomically and return the stored result.
    ///
    /// The id, creation time and source address are fixed at creation and the
    /// stage cannot move backwards; a mutator that tries is overruled.
    pub async fn update<F>(&self, id: &str, mutator: F) -> StoreResult<CaptureRecord>
    where
        F: FnOnce(&mut CaptureRecord),
    {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId);
        }

        let _guard = self.lock(id).await;
        let current = self.fetch(id).await?;

        let mut next = current.clone();
        mutator(&mut next);
        next.id = current.id.clone();
        next.created_at = current.created_at;
        next.source_address = current.source_address.clone();
        next.stage = current.stage.advance(next.stage);

        let result = sqlx::query(
            r#"
            UPDATE captures
            SET updated_at = ?2, simple_metadata = ?3, deep_metadata = ?4, stage = ?5, hit_count = ?6, fingerprint = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&next.id)
        .bind(next.updated_at)
        .bind(Json(&next.simple_metadata))
        .bind(next.deep_metadata.as_ref().map(Json))
        .bind(next.stage.as_str())
        .bind(next.hit_count)
        .bind(&next.fingerprint)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(next)
    }

    /// Records created after `after` (a `seq` cursor), oldest first
    pub async fn list_page(&self, after: Option<i64>, limit: i64) -> StoreResult<(Vec<CaptureRecord>, Option<i64>)> {
        let limit = limit.max(1);
        let rows = sqlx::query_as::<_, CaptureRow>(
            "SELECT * FROM captures WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
        )
        .bind(after.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| decode_error("listing", e))?;

        let full_page = rows.len() as i64 == limit;
        let mut last_seq = None;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let (seq, record) = row.into_record()?;
            last_seq = Some(seq);
            records.push(record);
        }

        let next = if full_page { last_seq } else { None };
        Ok((records, next))
    }

    /// Every record, in creation order
    pub async fn list_all(&self) -> StoreResult<Vec<CaptureRecord>> {
        let mut all = Vec::new();
        let mut cursor = None;
        loop {
            let (mut records, next) = self.list_page(cursor, 500).await?;
            all.append(&mut records);
            match next {
                Some(seq) => cursor = Some(seq),
                None => return Ok(all),
            }
        }
    }

    /// Ids of every record in creation order, readable even when a row fails to decode
    pub async fn list_ids(&self) -> StoreResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM captures ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId);
        }

        let _guard = self.lock(id).await;
        let result = sqlx::query("DELETE FROM captures WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Remove every record, returning how many were removed
    pub async fn delete_all(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM captures").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM captures")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::correlator::Correlator;
    use crate::db;

    pub(crate) async fn memory_store() -> FingerprintStore {
        let pool = db::create_pool("sqlite::memory:", 1).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        FingerprintStore::new(pool)
    }

    pub(crate) fn record(stage: Stage) -> CaptureRecord {
        let metadata = SimpleMetadata {
            method: "GET".to_string(),
            path: "/.env".to_string(),
            user_agent: Some("python-requests/2.31".to_string()),
            headers: vec![
                ("host".to_string(), "bait.example".to_string()),
                ("user-agent".to_string(), "python-requests/2.31".to_string()),
                ("accept".to_string(), "*/*".to_string()),
                ("accept".to_string(), "text/html".to_string()),
            ],
        };
        CaptureRecord::new(Correlator::new().mint(), stage, "203.0.113.9".to_string(), metadata)
    }

    #[tokio::test]
    async fn create_then_get_returns_same_record() {
        let store = memory_store().await;
        let original = record(Stage::SimpleCaptured);
        store.create(&original).await.unwrap();

        let loaded = store.get(&original.id).await.unwrap();
        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.stage, Stage::SimpleCaptured);
        assert_eq!(loaded.simple_metadata, original.simple_metadata);
        assert_eq!(loaded.deep_metadata, None);
        assert_eq!(loaded.hit_count, 1);
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let store = memory_store().await;
        let original = record(Stage::SimpleCaptured);
        store.create(&original).await.unwrap();

        let err = store.create(&original).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == original.id));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected_everywhere() {
        let store = memory_store().await;
        let mut bad = record(Stage::Seen);
        bad.id = "not-an-id".to_string();

        assert!(matches!(store.create(&bad).await, Err(StoreError::InvalidId)));
        assert!(matches!(store.get("short").await, Err(StoreError::InvalidId)));
        assert!(matches!(store.update("short", |_| {}).await, Err(StoreError::InvalidId)));
        assert!(matches!(store.delete("short").await, Err(StoreError::InvalidId)));
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let store = memory_store().await;
        let id = Correlator::new().mint();

        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.update(&id, |r| r.touch()).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_cannot_regress_stage_or_rewrite_identity() {
        let store = memory_store().await;
        let original = record(Stage::DeepCaptured);
        store.create(&original).await.unwrap();

        let updated = store
            .update(&original.id, |r| {
                r.stage = Stage::Seen;
                r.id = "x".repeat(64);
                r.source_address = "198.51.100.1".to_string();
                r.touch();
            })
            .await
            .unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.stage, Stage::DeepCaptured);
        assert_eq!(updated.source_address, "203.0.113.9");
        assert_eq!(updated.hit_count, 2);
        assert_eq!(store.get(&original.id).await.unwrap(), updated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_lose_no_increments() {
        let store = memory_store().await;
        let original = record(Stage::SimpleCaptured);
        store.create(&original).await.unwrap();

        let writers: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                let id = original.id.clone();
                tokio::spawn(async move { store.update(&id, |r| r.touch()).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(store.get(&original.id).await.unwrap().hit_count, 51);
    }

    #[tokio::test]
    async fn listing_follows_creation_order_and_pages() {
        let store = memory_store().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            let r = record(Stage::SimpleCaptured);
            store.create(&r).await.unwrap();
            ids.push(r.id);
        }

        let all: Vec<String> = store.list_all().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(all, ids);

        let (first, next) = store.list_page(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let (second, next) = store.list_page(next, 2).await.unwrap();
        assert_eq!(second[0].id, ids[2]);
        let (third, next) = store.list_page(next, 2).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn delete_removes_only_that_record() {
        let store = memory_store().await;
        let keep = record(Stage::SimpleCaptured);
        let gone = record(Stage::SimpleCaptured);
        store.create(&keep).await.unwrap();
        store.create(&gone).await.unwrap();

        store.delete(&gone.id).await.unwrap();
        assert!(matches!(store.get(&gone.id).await, Err(StoreError::NotFound(_))));
        assert!(store.get(&keep.id).await.is_ok());
        assert_eq!(store.delete_all().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_stage_surfaces_as_error() {
        let store = memory_store().await;
        let original = record(Stage::SimpleCaptured);
        store.create(&original).await.unwrap();

        sqlx::query("UPDATE captures SET stage = 'bogus' WHERE id = ?1")
            .bind(&original.id)
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(store.get(&original.id).await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("captures.db").display());
        let original = record(Stage::SimpleCaptured);

        {
            let pool = db::create_pool(&url, 2).await.unwrap();
            db::run_migrations(&pool).await.unwrap();
            FingerprintStore::new(pool.clone()).create(&original).await.unwrap();
            pool.close().await;
        }

        let pool = db::create_pool(&url, 2).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = FingerprintStore::new(pool);
        assert_eq!(store.get(&original.id).await.unwrap().id, original.id);
    }
}
