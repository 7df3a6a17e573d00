//! Configuration module

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "decoy-dev-secret-change-in-production";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// SQLite connection URL for the fingerprint store
    pub database_url: String,

    /// Pool size for the store
    pub db_max_connections: u32,

    /// Prefix of the operator routes
    pub admin_panel: String,

    /// Path the probe script submits deep collection payloads to
    pub deep_collector_path: String,

    /// Path of the probe script referenced by the bait page
    pub probe_script_path: String,

    /// Cookie carrying the correlation id
    pub correlation_cookie: String,

    /// Cookie carrying the operator session token
    pub session_cookie: String,

    /// Operator JWT secret key
    pub jwt_secret: String,

    /// JSON file listing webhook endpoints
    pub webhooks_file: Option<PathBuf>,

    pub webhook_retries: u32,
    pub webhook_backoff: Duration,
    pub webhook_timeout: Duration,

    /// Notify webhooks on first contact, not only on deep capture
    pub notify_on_simple: bool,

    /// Bait page template override
    pub bait_template: Option<PathBuf>,

    /// Directory holding `bait.<ext>` asset overrides
    pub bait_assets_dir: Option<PathBuf>,

    /// Replayed deep submissions overwrite stored deep metadata
    pub deep_refresh: bool,

    /// Static lookalike requests without a correlation id create a `Seen` record
    pub record_static_noise: bool,

    /// Mount `DELETE {admin_panel}/all`
    pub bulk_delete_enabled: bool,

    /// Take the source address from the first `X-Forwarded-For` hop
    pub trust_forwarded_for: bool,

    /// Upper bound on a deep collection body, in bytes
    pub deep_payload_limit: usize,

    /// Value of the spoofed `Server` response header
    pub server_header: String,

    /// Environment (development, production)
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite://captures.db".to_string(),
            db_max_connections: 4,
            admin_panel: "/console".to_string(),
            deep_collector_path: "/api/v2/collect".to_string(),
            probe_script_path: "/static/js/main.js".to_string(),
            correlation_cookie: "_sid".to_string(),
            session_cookie: "session".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            webhooks_file: None,
            webhook_retries: 2,
            webhook_backoff: Duration::from_millis(500),
            webhook_timeout: Duration::from_secs(5),
            notify_on_simple: false,
            bait_template: None,
            bait_assets_dir: None,
            deep_refresh: false,
            record_static_noise: false,
            bulk_delete_enabled: false,
            trust_forwarded_for: false,
            deep_payload_limit: 64 * 1024,
            server_header: "Google Frontend".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            port: parsed("PORT").unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.db_max_connections),
            admin_panel: env::var("ADMIN_PANEL").unwrap_or(defaults.admin_panel),
            deep_collector_path: env::var("DEEP_COLLECTOR_PATH")
                .unwrap_or(defaults.deep_collector_path),
            probe_script_path: env::var("PROBE_SCRIPT_PATH").unwrap_or(defaults.probe_script_path),
            correlation_cookie: env::var("CORRELATION_COOKIE")
                .unwrap_or(defaults.correlation_cookie),
            session_cookie: env::var("SESSION_COOKIE").unwrap_or(defaults.session_cookie),
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            webhooks_file: env::var("WEBHOOKS_FILE").ok().map(PathBuf::from),
            webhook_retries: parsed("WEBHOOK_RETRIES").unwrap_or(defaults.webhook_retries),
            webhook_backoff: parsed("WEBHOOK_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.webhook_backoff),
            webhook_timeout: parsed("WEBHOOK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_timeout),
            notify_on_simple: flag("NOTIFY_ON_SIMPLE").unwrap_or(defaults.notify_on_simple),
            bait_template: env::var("BAIT_TEMPLATE").ok().map(PathBuf::from),
            bait_assets_dir: env::var("BAIT_ASSETS_DIR").ok().map(PathBuf::from),
            deep_refresh: flag("DEEP_REFRESH").unwrap_or(defaults.deep_refresh),
            record_static_noise: flag("RECORD_STATIC_NOISE").unwrap_or(defaults.record_static_noise),
            bulk_delete_enabled: flag("BULK_DELETE_ENABLED").unwrap_or(defaults.bulk_delete_enabled),
            trust_forwarded_for: flag("TRUST_FORWARDED_FOR").unwrap_or(defaults.trust_forwarded_for),
            deep_payload_limit: parsed("DEEP_PAYLOAD_LIMIT").unwrap_or(defaults.deep_payload_limit),
            server_header: env::var("SERVER_HEADER").unwrap_or(defaults.server_header),
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
        }
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Refuse to boot a production server signing nothing but the development secret
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.jwt_secret == DEV_JWT_SECRET {
            return Err(ConfigError::DefaultSecret);
        }
        for (name, path) in [
            ("ADMIN_PANEL", &self.admin_panel),
            ("DEEP_COLLECTOR_PATH", &self.deep_collector_path),
            ("PROBE_SCRIPT_PATH", &self.probe_script_path),
        ] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(ConfigError::InvalidPath { name, path: path.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set in production")]
    DefaultSecret,

    #[error("{name} must be an absolute path, got {path:?}")]
    InvalidPath { name: &'static str, path: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_check() {
        assert!(Config::default().check().is_ok());
    }

    #[test]
    fn production_rejects_default_secret() {
        let config = Config {
            environment: "production".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.check(), Err(ConfigError::DefaultSecret)));

        let config = Config {
            jwt_secret: "a-real-secret".to_string(),
            ..config
        };
        assert!(config.check().is_ok());
    }

    #[test]
    fn relative_paths_are_rejected() {
        let config = Config {
            deep_collector_path: "collect".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.check(),
            Err(ConfigError::InvalidPath { name: "DEEP_COLLECTOR_PATH", .. })
        ));
    }
}
