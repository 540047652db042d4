//! Trait definitions for the scan ledger and status notification

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{NewScan, ScanRecord, ScanStatus, TagCode};

use super::{NotifyError, Result};

/// Append-only store of scan records.
///
/// Invariant: `insert` is the only mutating operation and never touches
/// existing rows.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScanLedger: Send + Sync {
    /// Append a scan; the ledger assigns `id`, `created_at` and `updated_at`.
    async fn insert(&self, scan: NewScan) -> Result<ScanRecord>;

    /// True iff at least one record for `tag` has `registered = true`.
    async fn exists_registered(&self, tag: &TagCode) -> Result<bool>;

    /// Most recent record for `tag` by `created_at`, ties broken by greatest `id`.
    async fn latest_by_tag(&self, tag: &TagCode) -> Result<Option<ScanRecord>>;
}

/// Administrative operations on the ledger.
///
/// These sit outside the scan path: listing, manual correction, deletion and
/// tag registration.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerAdmin: Send + Sync {
    /// All records, newest first.
    async fn list(&self) -> Result<Vec<ScanRecord>>;

    /// Record by id.
    async fn get(&self, id: i64) -> Result<Option<ScanRecord>>;

    /// Overwrite the status of an existing record.
    ///
    /// The edited record becomes the baseline for the next toggle if it is the
    /// latest for its tag.
    async fn update_status(&self, id: i64, status: ScanStatus) -> Result<ScanRecord>;

    /// Delete a record by id.
    async fn delete(&self, id: i64) -> Result<()>;

    /// Seed a registration record for `tag` unless it is already registered.
    ///
    /// Returns the seeded record, or `None` when the tag was already known.
    async fn register(&self, tag: &TagCode) -> Result<Option<ScanRecord>>;

    /// Total number of stored records.
    async fn count(&self) -> Result<u64>;
}

/// Publish/subscribe sink for presence status.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish `payload` on `topic` (at most once, not retained).
    async fn publish(&self, topic: &str, payload: &str) -> std::result::Result<(), NotifyError>;
}
