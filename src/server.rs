//! HTTP server bootstrap for the RFID ledger.
//!
//! This module wires together:
//! - configuration
//! - the scan ledger (SQLite or PostgreSQL)
//! - the status publisher and scan processor
//! - the Axum router and graceful shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::api::handlers::{health_check, metrics, readiness_check};
use crate::domain::TagCode;
use crate::infra::{
    connect_ledger, shutdown_signal, DisabledPublisher, LedgerAdmin, LedgerHandles, MqttConfig,
    MqttPublisher, ShutdownCoordinator, StatusPublisher,
};
use crate::processor::{ScanProcessor, DEFAULT_NOTIFY_TIMEOUT};

const DEFAULT_DATABASE_URL: &str = "sqlite://rfid_ledger.db?mode=rwc";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite or PostgreSQL connection URL.
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub max_connections: u32,
    pub migrate_on_startup: bool,
    /// Bound on a single status publish.
    pub notify_timeout: Duration,
    /// Tags registered at startup.
    pub registered_tags: Vec<String>,
    /// How long in-flight requests get to finish after a shutdown signal.
    pub shutdown_drain: Duration,
    /// `None` disables status notifications.
    pub mqtt: Option<MqttConfig>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let notify_timeout = std::env::var("NOTIFY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_NOTIFY_TIMEOUT);

        let registered_tags = std::env::var("REGISTERED_TAGS")
            .map(|v| parse_tag_list(&v))
            .unwrap_or_default();

        let shutdown_drain = std::env::var("SHUTDOWN_DRAIN_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
            migrate_on_startup,
            notify_timeout,
            registered_tags,
            shutdown_drain,
            mqtt: MqttConfig::from_env(),
        })
    }
}

/// `0`, `false` and `off` disable a flag; anything else enables it.
fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off"
    )
}

fn parse_tag_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<ScanProcessor>,
    pub admin: Arc<dyn LedgerAdmin>,
}

impl AppState {
    pub fn new(ledger: LedgerHandles, publisher: Arc<dyn StatusPublisher>) -> Self {
        Self {
            processor: Arc::new(ScanProcessor::new(ledger.scans, publisher)),
            admin: ledger.admin,
        }
    }

    pub fn with_processor(processor: ScanProcessor, admin: Arc<dyn LedgerAdmin>) -> Self {
        Self {
            processor: Arc::new(processor),
            admin,
        }
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting RFID ledger v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);
    info!("  Notify timeout: {:?}", config.notify_timeout);

    info!("Connecting to ledger database...");
    let ledger = connect_ledger(
        &config.database_url,
        config.max_connections,
        config.migrate_on_startup,
    )
    .await?;
    if !config.migrate_on_startup {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }
    info!("Connected to ledger database");

    register_tags(ledger.admin.as_ref(), &config.registered_tags).await?;

    let coordinator = ShutdownCoordinator::new();

    let publisher: Arc<dyn StatusPublisher> = match &config.mqtt {
        Some(mqtt) => Arc::new(MqttPublisher::start(mqtt, coordinator.signal())),
        None => {
            info!("Status notifications disabled (set MQTT_HOST to enable)");
            Arc::new(DisabledPublisher)
        }
    };

    let processor = ScanProcessor::new(ledger.scans, publisher)
        .with_notify_timeout(config.notify_timeout);
    let state = AppState::with_processor(processor, ledger.admin);

    let app = build_router(cors_layer_from_env()?).with_state(state);

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let server_signal = coordinator.signal();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_signal.wait().await })
        .into_future();
    let mut server = tokio::spawn(server);

    info!("RFID ledger is ready to accept connections");

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    coordinator.shutdown();

    match tokio::time::timeout(config.shutdown_drain, server).await {
        Ok(result) => {
            result??;
            info!("HTTP server stopped");
        }
        Err(_) => warn!(
            drain = ?config.shutdown_drain,
            "In-flight requests did not finish before the drain deadline"
        ),
    }

    Ok(())
}

/// Register bootstrap tags, skipping any already known.
pub async fn register_tags(admin: &dyn LedgerAdmin, tags: &[String]) -> anyhow::Result<()> {
    for raw in tags {
        let tag = match TagCode::parse(raw) {
            Ok(tag) => tag,
            Err(e) => {
                warn!(tag = %raw, error = %e, "Skipping invalid bootstrap tag");
                continue;
            }
        };

        match admin.register(&tag).await? {
            Some(record) => info!(tag = %tag, id = record.id, "Registered tag"),
            None => debug!(tag = %tag, "Tag already registered"),
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Build the full application router.
pub fn build_router(cors: Option<CorsLayer>) -> Router<AppState> {
    let mut router = Router::new()
        .nest("/api", crate::api::router())
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .fallback(crate::api::not_found_fallback)
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors {
        router = router.layer(cors_layer);
    }

    router
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => cors_layer(&v),
        Err(_) => Ok(None),
    }
}

fn cors_layer(origins: &str) -> anyhow::Result<Option<CorsLayer>> {
    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
    ))
}
