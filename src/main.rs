//! Decoy Server
//!
//! Deception web server: anything that is not an authenticated operator is
//! served bait while its requests are fingerprinted and correlated.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DECOY SERVER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  request ──► Gatekeeper ──► operator? ──► Harvester          │
//! │                  │                           │               │
//! │                  ▼                           │               │
//! │              Collector ──► Correlator        │               │
//! │                  │                           │               │
//! │                  ├──► Fingerprint Store ◄────┘               │
//! │                  │         (SQLite)                          │
//! │                  └──► Webhook Dispatcher ──► (async tasks)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod collector;
mod config;
mod correlator;
mod db;
mod error;
mod handlers;
mod harvester;
mod middleware;
mod models;
mod store;
mod webhook;

use anyhow::Context;
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

use collector::{BaitCatalog, Collector, Gatekeeper};
use config::{Config, ConfigError};
use harvester::Harvester;
use middleware::auth::{Authenticator, JwtAuthenticator};
use store::FingerprintStore;
use webhook::WebhookDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize logging
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "decoy_server=debug,requests=info,tower_http=info".into()),
    );
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = Config::from_env();
    config.check()?;

    tracing::info!("Decoy server starting...");
    tracing::info!("Database: {}", config.database_url);

    // Initialize database pool
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to create database pool")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    // Build application state
    let state = AppState::from_config(config.clone(), FingerprintStore::new(pool))?;
    tracing::info!(
        "Operator panel at {}, deep collection at {}, {} webhooks",
        config.admin_panel,
        config.deep_collector_path,
        state.webhooks
    );

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: FingerprintStore,
    pub collector: Collector,
    pub harvester: Harvester,
    pub gatekeeper: Arc<Gatekeeper>,
    pub webhooks: usize,
}

impl AppState {
    pub fn new(
        config: Config,
        store: FingerprintStore,
        dispatcher: WebhookDispatcher,
        catalog: BaitCatalog,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            gatekeeper: Arc::new(Gatekeeper::new(authenticator, &config)),
            webhooks: dispatcher.webhook_count(),
            collector: Collector::new(store.clone(), dispatcher, catalog, &config),
            harvester: Harvester::new(store.clone(), config.bulk_delete_enabled),
            store,
            config: Arc::new(config),
        }
    }

    /// Load bait content and webhooks named by the configuration
    pub fn from_config(config: Config, store: FingerprintStore) -> Result<Self, ConfigError> {
        let catalog = BaitCatalog::load(&config)?;
        let dispatcher = WebhookDispatcher::from_config(&config);
        let authenticator = Arc::new(JwtAuthenticator::new(&config));
        Ok(Self::new(config, store, dispatcher, catalog, authenticator))
    }
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // Operator routes (JWT capability check, everyone else gets bait)
    let mut all = get(handlers::harvest::extract_all).post(handlers::harvest::update_all);
    if state.harvester.bulk_delete_enabled() {
        tracing::warn!("Bulk delete is enabled");
        all = all.delete(handlers::harvest::delete_all);
    }

    let operator_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/all", all)
        .route(
            "/:id",
            get(handlers::harvest::extract).delete(handlers::harvest::delete),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_operator,
        ));

    let server_header = HeaderValue::from_str(&config.server_header)
        .unwrap_or_else(|_| HeaderValue::from_static("Google Frontend"));

    // Everything else is classified and baited
    Router::new()
        .nest(&config.admin_panel, operator_routes)
        .fallback(handlers::collect::catch_all)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_log::log_unauthenticated,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(header::SERVER, server_header))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("deny"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_XSS_PROTECTION,
                    HeaderValue::from_static("mode=block"),
                )),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([
                    Method::POST,
                    Method::GET,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                    Method::HEAD,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    HeaderName::from_static("x-requested-with"),
                ])
                .max_age(Duration::from_secs(86400)),
        )
        .with_state(state)
}
