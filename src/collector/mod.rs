//! Collector
//!
//! Turns unauthenticated requests into capture record effects. Whatever
//! happens in here, the visitor gets a bait response: store and webhook
//! failures are logged and swallowed.
//!
//! ```text
//!   first contact ──► SimpleCaptured ──► probe fetch ──► DeepRequested ──► deep submit ──► DeepCaptured
//!        (static noise, opt-in) ──► Seen ──┘
//! ```

pub mod bait;
pub mod gatekeeper;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use std::net::SocketAddr;
use std::sync::Arc;
use validator::Validate;

use crate::config::Config;
use crate::correlator::Correlator;
use crate::models::{CaptureRecord, DeepSubmission, SimpleMetadata, Stage};
use crate::store::{FingerprintStore, StoreError};
use crate::webhook::{CaptureEvent, WebhookDispatcher};

pub use bait::{Bait, BaitCatalog};
pub use gatekeeper::{Classification, Gatekeeper, RequestClassifier};

/// What the collector sees of one request
#[derive(Debug, Clone)]
pub struct Visit {
    pub method: String,
    /// Path and query as received
    pub target: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub source_address: String,
    /// Correlation cookie value, unverified
    pub token: Option<String>,
}

impl Visit {
    pub fn from_parts(parts: &Parts, config: &Config) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Self {
            method: parts.method.to_string(),
            target: parts
                .uri
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
            path: parts.uri.path().to_string(),
            headers: header_pairs(&parts.headers),
            source_address: source_address(&parts.headers, peer, config.trust_forwarded_for),
            token: CookieJar::from_headers(&parts.headers)
                .get(&config.correlation_cookie)
                .map(|c| c.value().to_string()),
        }
    }

    fn metadata(&self) -> SimpleMetadata {
        let mut metadata = SimpleMetadata {
            method: self.method.clone(),
            path: self.target.clone(),
            user_agent: None,
            headers: self.headers.clone(),
        };
        metadata.user_agent = metadata.header("user-agent").map(str::to_string);
        metadata
    }
}

pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

pub fn source_address(headers: &HeaderMap, peer: Option<String>, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .flatten();

    forwarded
        .or(peer)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Result of a deep collection submission, for logging and tests only.
/// The visitor sees the same bait whatever the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepOutcome {
    Captured,
    Refreshed,
    Replayed,
    Malformed,
    InvalidId,
    Unknown,
    StoreFailed,
}

#[derive(Debug, Clone)]
struct CollectorPolicy {
    correlation_cookie: String,
    probe_script_path: String,
    deep_refresh: bool,
    record_static_noise: bool,
}

#[derive(Clone)]
pub struct Collector {
    store: FingerprintStore,
    correlator: Correlator,
    dispatcher: WebhookDispatcher,
    catalog: Arc<BaitCatalog>,
    policy: Arc<CollectorPolicy>,
}

impl Collector {
    pub fn new(
        store: FingerprintStore,
        dispatcher: WebhookDispatcher,
        catalog: BaitCatalog,
        config: &Config,
    ) -> Self {
        Self {
            store,
            correlator: Correlator::new(),
            dispatcher,
            catalog: Arc::new(catalog),
            policy: Arc::new(CollectorPolicy {
                correlation_cookie: config.correlation_cookie.clone(),
                probe_script_path: config.probe_script_path.clone(),
                deep_refresh: config.deep_refresh,
                record_static_noise: config.record_static_noise,
            }),
        }
    }

    /// The bait page with no correlation attached
    pub fn bait(&self) -> Bait {
        self.catalog.page()
    }

    fn correlate(&self, bait: Bait, id: Option<&str>) -> Bait {
        bait.with_correlation(&self.policy.correlation_cookie, id)
    }

    /// Presented token, if it has the shape of an id we could have issued
    fn presented_id<'a>(&self, visit: &'a Visit) -> Option<&'a str> {
        visit
            .token
            .as_deref()
            .filter(|token| self.correlator.validate(token))
    }

    /// Mint an id and persist a fresh record for this visit
    async fn open_record(&self, visit: &Visit, stage: Stage) -> Option<CaptureRecord> {
        let record = CaptureRecord::new(self.correlator.mint(), stage, visit.source_address.clone(), visit.metadata());

        match self.store.create(&record).await {
            Ok(()) => {
                tracing::info!(
                    capture = %record.id,
                    stage = %record.stage,
                    "New capture from {} {} {}", record.source_address, visit.method, visit.target
                );
                Some(record)
            }
            Err(StoreError::AlreadyExists(id)) => {
                tracing::error!("Integrity fault: minted id {} already stored, contact dropped", id);
                None
            }
            Err(e) => {
                tracing::warn!("Capture not stored for {}: {}", visit.source_address, e);
                None
            }
        }
    }

    /// First stage: every ordinary unauthenticated request
    pub async fn simple_collect(&self, visit: &Visit) -> Bait {
        if let Some(id) = self.presented_id(visit) {
            let result = self
                .store
                .update(id, |r| {
                    r.touch();
                    r.stage = r.stage.advance(Stage::SimpleCaptured);
                })
                .await;

            match result {
                Ok(record) => {
                    tracing::debug!(capture = %record.id, hits = record.hit_count, "Repeat contact");
                    return self.correlate(self.bait(), Some(&record.id));
                }
                // Stale or forged token: treat as a first contact
                Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(capture = %id, "Repeat contact not recorded: {}", e);
                    return self.bait();
                }
            }
        }

        match self.open_record(visit, Stage::SimpleCaptured).await {
            Some(record) => {
                self.dispatcher.notify(CaptureEvent::SimpleCaptured, &record);
                self.correlate(self.bait(), Some(&record.id))
            }
            None => self.bait(),
        }
    }

    /// Requests for asset-looking paths. The probe script path arms deep
    /// collection; extensions we have no lookalike for are ordinary bait.
    pub async fn get_extension(&self, visit: &Visit, extension: &str) -> Bait {
        let is_probe = visit.path == self.policy.probe_script_path;
        let asset = if is_probe { None } else { self.catalog.asset(extension) };
        if !is_probe && asset.is_none() {
            return self.simple_collect(visit).await;
        }

        let mut known = None;
        if let Some(id) = self.presented_id(visit) {
            let result = self
                .store
                .update(id, |r| {
                    r.touch();
                    if is_probe {
                        r.stage = r.stage.advance(Stage::DeepRequested);
                    }
                })
                .await;

            match result {
                Ok(record) => known = Some(record.id),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => tracing::warn!(capture = %id, "Asset contact not recorded: {}", e),
            }
        }

        if known.is_none() && self.policy.record_static_noise {
            known = self.open_record(visit, Stage::Seen).await.map(|r| r.id);
        }

        let bait = match asset {
            Some(asset) => asset,
            None => self.catalog.probe(known.as_deref()),
        };
        self.correlate(bait, known.as_deref())
    }

    /// Second stage: the probe script posting `{id, data}`
    pub async fn deep_collect(&self, visit: &Visit, body: &[u8]) -> Bait {
        let outcome = self.ingest_deep(body).await;
        tracing::debug!("Deep submission: {:?}", outcome);
        self.decline(visit).await
    }

    /// What the deep route answers: the bait page carrying the same cookie
    /// `simple_collect` would hand this visitor, with nothing persisted.
    pub async fn decline(&self, visit: &Visit) -> Bait {
        let id = self.unstored_correlation(visit).await;
        self.correlate(self.bait(), id.as_deref())
    }

    async fn unstored_correlation(&self, visit: &Visit) -> Option<String> {
        if let Some(id) = self.presented_id(visit) {
            match self.store.get(id).await {
                Ok(record) => return Some(record.id),
                Err(StoreError::NotFound(_)) => {}
                Err(_) => return None,
            }
        }

        // A fresh id is only handed out while the store could have recorded it
        let id = self.correlator.mint();
        match self.store.get(&id).await {
            Err(StoreError::NotFound(_)) => Some(id),
            _ => None,
        }
    }

    pub async fn ingest_deep(&self, body: &[u8]) -> DeepOutcome {
        let submission: DeepSubmission = match serde_json::from_slice(body) {
            Ok(submission) => submission,
            Err(_) => return DeepOutcome::Malformed,
        };
        if submission.validate().is_err() || !self.correlator.validate(&submission.id) {
            return DeepOutcome::InvalidId;
        }
        let data = match submission.data {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => return DeepOutcome::Malformed,
        };

        let refresh = self.policy.deep_refresh;
        let mut outcome = DeepOutcome::Replayed;
        let result = self
            .store
            .update(&submission.id, |r| {
                r.touch();
                if r.deep_metadata.is_none() {
                    r.deep_metadata = Some(data);
                    outcome = DeepOutcome::Captured;
                } else if refresh {
                    r.deep_metadata = Some(data);
                    outcome = DeepOutcome::Refreshed;
                }
                r.stage = r.stage.advance(Stage::DeepCaptured);
                r.refresh_fingerprint();
            })
            .await;

        match result {
            Ok(record) => {
                if outcome != DeepOutcome::Replayed {
                    tracing::info!(capture = %record.id, "Deep capture ({:?})", outcome);
                    self.dispatcher.notify(CaptureEvent::DeepCaptured, &record);
                }
                outcome
            }
            Err(StoreError::NotFound(_)) => DeepOutcome::Unknown,
            Err(e) => {
                tracing::warn!(capture = %submission.id, "Deep capture not stored: {}", e);
                DeepOutcome::StoreFailed
            }
        }
    }
}
