//! Deep collection submission and harvest paging models

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::CaptureRecord;

/// Body posted by the probe script
#[derive(Debug, Deserialize, Validate)]
pub struct DeepSubmission {
    #[validate(length(equal = 64))]
    pub id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub after: Option<i64>,
    pub limit: Option<i64>,
}

/// One page of records in creation order; `next` resumes after the last one
#[derive(Debug, Serialize)]
pub struct RecordPage {
    pub records: Vec<CaptureRecord>,
    pub next: Option<i64>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SweepFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of a maintenance sweep
#[derive(Debug, Serialize, Default)]
pub struct SweepSummary {
    pub scanned: usize,
    pub updated: usize,
    pub failed: Vec<SweepFailure>,
}
