//! RFID Ledger Library
//!
//! Records badge scans in an append-only ledger, toggles presence status for
//! registered tags and publishes the computed status over MQTT.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (tag codes, scan records, status)
//! - [`infra`] - Infrastructure implementations (SQLite, PostgreSQL, MQTT)
//! - [`processor`] - Scan processing and status notification
//! - [`metrics`] - In-process counters and gauges
//! - [`api`] - REST API routes
//! - [`server`] - HTTP server bootstrap

pub mod api;
pub mod domain;
pub mod infra;
pub mod metrics;
pub mod migrations;
pub mod processor;
pub mod server;

// Re-export commonly used types
pub use domain::{NewScan, ScanRecord, ScanStatus, TagCode, STATUS_TOPIC};

pub use infra::{LedgerAdmin, LedgerError, NotifyError, Result, ScanLedger, StatusPublisher};
pub use processor::{ProcessedScan, ScanError, ScanProcessor};
