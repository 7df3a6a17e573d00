//! Harvester - operator read/export/delete surface over the store

use crate::correlator::Correlator;
use crate::models::{CaptureRecord, PageQuery, RecordPage, Stage, SweepFailure, SweepSummary};
use crate::store::{FingerprintStore, StoreError};

const MAX_PAGE: i64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bulk delete is disabled")]
    BulkDeleteDisabled,
}

pub type HarvestResult<T> = Result<T, HarvestError>;

#[derive(Clone)]
pub struct Harvester {
    store: FingerprintStore,
    correlator: Correlator,
    bulk_delete_enabled: bool,
}

impl Harvester {
    pub fn new(store: FingerprintStore, bulk_delete_enabled: bool) -> Self {
        Self {
            store,
            correlator: Correlator::new(),
            bulk_delete_enabled,
        }
    }

    pub async fn extract(&self, id: &str) -> HarvestResult<CaptureRecord> {
        if !self.correlator.validate(id) {
            return Err(StoreError::InvalidId.into());
        }
        Ok(self.store.get(id).await?)
    }

    /// All records in creation order. With a `limit`, one page resuming after `after`.
    pub async fn extract_all(&self, query: &PageQuery) -> HarvestResult<RecordPage> {
        match query.limit {
            Some(limit) => {
                let (records, next) = self
                    .store
                    .list_page(query.after, limit.clamp(1, MAX_PAGE))
                    .await?;
                Ok(RecordPage { records, next })
            }
            None => {
                let records = match query.after {
                    Some(after) => self.store.list_page(Some(after), i64::MAX).await?.0,
                    None => self.store.list_all().await?,
                };
                Ok(RecordPage { records, next: None })
            }
        }
    }

    /// Maintenance sweep: recompute fingerprints and repair stage invariants
    /// on every record. One bad record does not stop the sweep.
    pub async fn update_all(&self) -> HarvestResult<SweepSummary> {
        let ids = self.store.list_ids().await?;
        let mut summary = SweepSummary::default();

        for id in ids {
            summary.scanned += 1;
            let mut changed = false;
            let result = self
                .store
                .update(&id, |r| changed = maintain(r))
                .await;

            match result {
                Ok(_) if changed => summary.updated += 1,
                Ok(_) => {}
                // Deleted while the sweep was running
                Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(capture = %id, "Sweep failed: {}", e);
                    summary.failed.push(SweepFailure {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Sweep finished: {} scanned, {} updated, {} failed",
            summary.scanned,
            summary.updated,
            summary.failed.len()
        );
        Ok(summary)
    }

    pub async fn delete(&self, id: &str) -> HarvestResult<()> {
        if !self.correlator.validate(id) {
            return Err(StoreError::InvalidId.into());
        }
        Ok(self.store.delete(id).await?)
    }

    /// Wipe the store. Refused unless bulk delete was explicitly enabled.
    pub async fn delete_all(&self) -> HarvestResult<u64> {
        if !self.bulk_delete_enabled {
            return Err(HarvestError::BulkDeleteDisabled);
        }
        Ok(self.store.delete_all().await?)
    }

    pub fn bulk_delete_enabled(&self) -> bool {
        self.bulk_delete_enabled
    }
}

/// Returns whether anything had to change
fn maintain(record: &mut CaptureRecord) -> bool {
    let mut changed = false;

    if record.deep_metadata.is_some() && record.stage < Stage::DeepCaptured {
        record.stage = Stage::DeepCaptured;
        changed = true;
    }
    if record.hit_count < 1 {
        record.hit_count = 1;
        changed = true;
    }
    let fingerprint = record.compute_fingerprint();
    if record.fingerprint != fingerprint {
        record.fingerprint = fingerprint;
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{memory_store, record};

    async fn harvester(bulk: bool) -> (Harvester, FingerprintStore) {
        let store = memory_store().await;
        (Harvester::new(store.clone(), bulk), store)
    }

    #[tokio::test]
    async fn extract_validates_shape_before_lookup() {
        let (harvester, store) = harvester(false).await;
        let r = record(Stage::SimpleCaptured);
        store.create(&r).await.unwrap();

        assert_eq!(harvester.extract(&r.id).await.unwrap().id, r.id);
        assert!(matches!(
            harvester.extract("nope").await,
            Err(HarvestError::Store(StoreError::InvalidId))
        ));
        assert!(matches!(
            harvester.extract(&"0".repeat(64)).await,
            Err(HarvestError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn delete_then_extract_is_not_found() {
        let (harvester, store) = harvester(false).await;
        let r = record(Stage::DeepCaptured);
        store.create(&r).await.unwrap();

        harvester.delete(&r.id).await.unwrap();
        assert!(matches!(
            harvester.extract(&r.id).await,
            Err(HarvestError::Store(StoreError::NotFound(_)))
        ));
        assert!(matches!(
            harvester.delete(&r.id).await,
            Err(HarvestError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn extract_all_pages_in_creation_order() {
        let (harvester, store) = harvester(false).await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let r = record(Stage::SimpleCaptured);
            store.create(&r).await.unwrap();
            ids.push(r.id);
        }

        let everything = harvester.extract_all(&PageQuery::default()).await.unwrap();
        let listed: Vec<_> = everything.records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(listed, ids);
        assert_eq!(everything.next, None);

        let page = harvester
            .extract_all(&PageQuery { after: None, limit: Some(2) })
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        let rest = harvester
            .extract_all(&PageQuery { after: page.next, limit: None })
            .await
            .unwrap();
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.records[0].id, ids[2]);
    }

    #[tokio::test]
    async fn sweep_repairs_records_and_reports_failures() {
        let (harvester, store) = harvester(false).await;

        let healthy = record(Stage::SimpleCaptured);
        store.create(&healthy).await.unwrap();

        let mut stale = record(Stage::DeepRequested);
        stale.deep_metadata = Some(serde_json::json!({"tz": "UTC"}));
        stale.fingerprint = "outdated".to_string();
        store.create(&stale).await.unwrap();

        let broken = record(Stage::SimpleCaptured);
        store.create(&broken).await.unwrap();
        sqlx::query("UPDATE captures SET simple_metadata = 'garbage' WHERE id = ?1")
            .bind(&broken.id)
            .execute(store.pool())
            .await
            .unwrap();

        let summary = harvester.update_all().await.unwrap();
        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].id, broken.id);

        let repaired = store.get(&stale.id).await.unwrap();
        assert_eq!(repaired.stage, Stage::DeepCaptured);
        assert_eq!(repaired.fingerprint, repaired.compute_fingerprint());
    }

    #[tokio::test]
    async fn bulk_delete_is_disabled_unless_enabled() {
        let (harvester, store) = harvester(false).await;
        store.create(&record(Stage::SimpleCaptured)).await.unwrap();
        assert!(matches!(harvester.delete_all().await, Err(HarvestError::BulkDeleteDisabled)));
        assert_eq!(store.count().await.unwrap(), 1);

        let enabled = Harvester::new(store.clone(), true);
        assert_eq!(enabled.delete_all().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
