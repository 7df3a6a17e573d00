//! Webhook Dispatcher
//!
//! Pushes capture events to external endpoints (Slack, Discord or any JSON
//! receiver). Every delivery runs on its own task so the request that caused
//! it never waits on the network; failures are retried a bounded number of
//! times, then logged and dropped.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{Config, ConfigError};
use crate::models::CaptureRecord;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookPlatform {
    #[default]
    Generic,
    Slack,
    Discord,
}

impl WebhookPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookPlatform::Generic => "generic",
            WebhookPlatform::Slack => "slack",
            WebhookPlatform::Discord => "discord",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEvent {
    SimpleCaptured,
    DeepCaptured,
}

impl CaptureEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureEvent::SimpleCaptured => "simple_captured",
            CaptureEvent::DeepCaptured => "deep_captured",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_events() -> Vec<CaptureEvent> {
    vec![CaptureEvent::DeepCaptured]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub platform: WebhookPlatform,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_events")]
    pub events: Vec<CaptureEvent>,
}

/// Read the webhook list; a missing or unparsable file means no webhooks
pub fn load_webhooks(path: &Path) -> Vec<WebhookConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            let err = ConfigError::Read { path: path.to_path_buf(), source: e };
            tracing::warn!("Webhooks disabled: {}", err);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<WebhookConfig>>(&content) {
        Ok(list) => {
            tracing::info!("Loaded {} webhooks from {}", list.len(), path.display());
            list
        }
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CapturePayload {
    pub event_id: Uuid,
    pub event: CaptureEvent,
    pub id: String,
    pub stage: String,
    pub hit_count: i64,
    pub source_address: String,
    pub user_agent: Option<String>,
    pub fingerprint: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CapturePayload {
    pub fn new(event: CaptureEvent, record: &CaptureRecord) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event,
            id: record.id.clone(),
            stage: record.stage.as_str().to_string(),
            hit_count: record.hit_count,
            source_address: record.source_address.clone(),
            user_agent: record.simple_metadata.user_agent.clone(),
            fingerprint: record.fingerprint.clone(),
            created_at: record.created_at.timestamp(),
            updated_at: record.updated_at.timestamp(),
        }
    }

    fn title(&self) -> String {
        match self.event {
            CaptureEvent::SimpleCaptured => format!("New visitor from {}", self.source_address),
            CaptureEvent::DeepCaptured => format!("Deep capture from {}", self.source_address),
        }
    }
}

fn format_payload(platform: WebhookPlatform, payload: &CapturePayload) -> serde_json::Value {
    match platform {
        WebhookPlatform::Generic => serde_json::to_value(payload).unwrap_or_default(),
        WebhookPlatform::Slack => format_slack(payload),
        WebhookPlatform::Discord => format_discord(payload),
    }
}

fn format_slack(payload: &CapturePayload) -> serde_json::Value {
    let fields = vec![
        serde_json::json!({ "type": "mrkdwn", "text": format!("*Id:* `{}`", payload.id) }),
        serde_json::json!({ "type": "mrkdwn", "text": format!("*Stage:* {}", payload.stage) }),
        serde_json::json!({ "type": "mrkdwn", "text": format!("*Hits:* {}", payload.hit_count) }),
        serde_json::json!({
            "type": "mrkdwn",
            "text": format!("*User-Agent:* {}", payload.user_agent.as_deref().unwrap_or("-"))
        }),
    ];

    serde_json::json!({
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": payload.title() }
            },
            { "type": "section", "fields": fields }
        ]
    })
}

fn format_discord(payload: &CapturePayload) -> serde_json::Value {
    let color = match payload.event {
        CaptureEvent::SimpleCaptured => 0x3498db,
        CaptureEvent::DeepCaptured => 0xe74c3c,
    };

    serde_json::json!({
        "embeds": [{
            "title": payload.title(),
            "color": color,
            "fields": [
                { "name": "Id", "value": payload.id, "inline": false },
                { "name": "Stage", "value": payload.stage, "inline": true },
                { "name": "Hits", "value": payload.hit_count.to_string(), "inline": true },
                {
                    "name": "User-Agent",
                    "value": payload.user_agent.as_deref().unwrap_or("-"),
                    "inline": false
                }
            ],
            "timestamp": chrono::Utc::now().to_rfc3339()
        }]
    })
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint answered {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    hooks: Arc<Vec<WebhookConfig>>,
    retries: u32,
    backoff: Duration,
    notify_on_simple: bool,
}

impl WebhookDispatcher {
    pub fn new(hooks: Vec<WebhookConfig>, config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.webhook_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            hooks: Arc::new(hooks),
            retries: config.webhook_retries,
            backoff: config.webhook_backoff,
            notify_on_simple: config.notify_on_simple,
        }
    }

    /// Build from configuration, loading the webhook file if one is set
    pub fn from_config(config: &Config) -> Self {
        let hooks = config
            .webhooks_file
            .as_deref()
            .map(load_webhooks)
            .unwrap_or_default();
        Self::new(hooks, config)
    }

    pub fn webhook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Enqueue deliveries of `event` for `record`; returns how many were enqueued.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, event: CaptureEvent, record: &CaptureRecord) -> usize {
        if event == CaptureEvent::SimpleCaptured && !self.notify_on_simple {
            return 0;
        }

        let payload = CapturePayload::new(event, record);
        let mut enqueued = 0;

        for hook in self.hooks.iter() {
            if !hook.enabled || !hook.events.contains(&event) {
                continue;
            }

            let body = format_payload(hook.platform, &payload);
            let client = self.client.clone();
            let hook = hook.clone();
            let retries = self.retries;
            let backoff = self.backoff;
            let capture_id = payload.id.clone();

            tokio::spawn(async move {
                if let Err(e) = deliver(&client, &hook, &body, retries, backoff).await {
                    tracing::warn!(
                        webhook = %hook.name,
                        capture = %capture_id,
                        "Webhook delivery of {} dropped: {}", event.as_str(), e
                    );
                }
            });
            enqueued += 1;
        }

        enqueued
    }
}

async fn deliver(
    client: &reqwest::Client,
    hook: &WebhookConfig,
    body: &serde_json::Value,
    retries: u32,
    backoff: Duration,
) -> Result<(), DeliveryError> {
    let mut delay = backoff;
    let mut attempt = 0;

    loop {
        let result = match client.post(&hook.url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(DeliveryError::Status(resp.status())),
            Err(e) => Err(DeliveryError::Request(e)),
        };

        match result {
            Ok(()) => {
                tracing::debug!("Webhook delivered to {} ({})", hook.name, hook.platform.as_str());
                return Ok(());
            }
            Err(e) if attempt < retries => {
                tracing::debug!("Webhook {} attempt {} failed: {}", hook.name, attempt + 1, e);
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
