//! Infrastructure layer for the RFID ledger
//!
//! Contains trait definitions and implementations for:
//! - Scan ledger storage (SQLite, PostgreSQL)
//! - Status notification over MQTT
//! - Per-tag locking for the toggle
//! - Circuit breaker (broker protection)
//! - Graceful shutdown

mod circuit_breaker;
mod error;
mod graceful_shutdown;
mod mqtt;
pub mod postgres;
pub mod sqlite;
mod tag_locks;
mod traits;

use std::sync::Arc;

use tracing::info;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use error::*;
pub use graceful_shutdown::{
    shutdown_signal, spawn_until_shutdown, ShutdownCoordinator, ShutdownSignal,
};
pub use mqtt::{DisabledPublisher, MqttConfig, MqttPublisher};
pub use postgres::PgScanLedger;
pub use sqlite::SqliteScanLedger;
pub use tag_locks::{TagGuard, TagLocks};
pub use traits::*;

/// Scan-path and administrative views of one ledger
#[derive(Clone)]
pub struct LedgerHandles {
    pub scans: Arc<dyn ScanLedger>,
    pub admin: Arc<dyn LedgerAdmin>,
}

impl LedgerHandles {
    pub fn from_ledger<L>(ledger: L) -> Self
    where
        L: ScanLedger + LedgerAdmin + 'static,
    {
        let ledger = Arc::new(ledger);
        Self {
            scans: ledger.clone(),
            admin: ledger,
        }
    }
}

/// Which backend a database URL selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            Err(LedgerError::Configuration(format!(
                "unsupported DATABASE_URL scheme: {url}"
            )))
        }
    }
}

/// Connect to the ledger named by `url`, optionally applying migrations
pub async fn connect_ledger(
    url: &str,
    max_connections: u32,
    migrate: bool,
) -> Result<LedgerHandles> {
    match Backend::from_url(url)? {
        Backend::Sqlite => {
            let ledger = SqliteScanLedger::connect(url, max_connections).await?;
            if migrate {
                ledger.initialize().await?;
                info!("SQLite migrations applied");
            }
            Ok(LedgerHandles::from_ledger(ledger))
        }
        Backend::Postgres => {
            let ledger = PgScanLedger::connect(url, max_connections).await?;
            if migrate {
                ledger.initialize().await?;
                info!("PostgreSQL migrations applied");
            }
            Ok(LedgerHandles::from_ledger(ledger))
        }
    }
}
