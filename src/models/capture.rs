//! Capture record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Progress of a visitor through the bait flow.
///
/// Ordering follows the flow, so `max` advances a stage and never regresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Seen,
    SimpleCaptured,
    DeepRequested,
    DeepCaptured,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Seen => "seen",
            Stage::SimpleCaptured => "simple_captured",
            Stage::DeepRequested => "deep_requested",
            Stage::DeepCaptured => "deep_captured",
        }
    }

    /// Move forward to `to`, staying put if already past it
    pub fn advance(self, to: Stage) -> Stage {
        self.max(to)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seen" => Ok(Stage::Seen),
            "simple_captured" => Ok(Stage::SimpleCaptured),
            "deep_requested" => Ok(Stage::DeepRequested),
            "deep_captured" => Ok(Stage::DeepCaptured),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// Request facts captured verbatim at first contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimpleMetadata {
    pub method: String,
    pub path: String,
    pub user_agent: Option<String>,
    /// Header name/value pairs in arrival order; repeated headers appear once per value
    pub headers: Vec<(String, String)>,
}

impl SimpleMetadata {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Persisted fingerprint of one correlated visitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_address: String,
    pub simple_metadata: SimpleMetadata,
    pub deep_metadata: Option<serde_json::Value>,
    pub stage: Stage,
    pub hit_count: i64,
    /// SHA-256 over user agent, header names and deep metadata keys
    pub fingerprint: String,
}

impl CaptureRecord {
    pub fn new(id: String, stage: Stage, source_address: String, simple_metadata: SimpleMetadata) -> Self {
        let now = Utc::now();
        let mut record = Self {
            id,
            created_at: now,
            updated_at: now,
            source_address,
            simple_metadata,
            deep_metadata: None,
            stage,
            hit_count: 1,
            fingerprint: String::new(),
        };
        record.fingerprint = record.compute_fingerprint();
        record
    }

    /// Count one more correlated contact
    pub fn touch(&mut self) {
        self.hit_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.simple_metadata.user_agent.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
        for (name, _) in &self.simple_metadata.headers {
            hasher.update(name.to_ascii_lowercase().as_bytes());
            hasher.update(b",");
        }
        if let Some(serde_json::Value::Object(map)) = &self.deep_metadata {
            hasher.update(b"\n");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b",");
            }
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn refresh_fingerprint(&mut self) {
        self.fingerprint = self.compute_fingerprint();
    }
}
