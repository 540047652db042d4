//! SQLite scan ledger
//!
//! Default backend for single-node deployments. Timestamps are stored as
//! RFC 3339 text with fixed microsecond precision and a `Z` suffix so that
//! ordering by the text column is chronological. `created_at` is monotonic
//! per tag.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::instrument;

use crate::domain::{NewScan, ScanRecord, ScanStatus, TagCode};
use crate::infra::{LedgerAdmin, LedgerError, Result, ScanLedger};

const SELECT_COLUMNS: &str =
    "SELECT id, rfid_number, status, registered, created_at, updated_at FROM rfids";

/// Appends one row. `created_at` is the later of the supplied stamp and the
/// newest stamp already stored for the tag, so the per-tag tail only moves
/// forward even if the wall clock steps back.
const INSERT_SCAN: &str = r#"
    INSERT INTO rfids (rfid_number, status, registered, created_at, updated_at)
    SELECT ?1, ?2, ?3, s.stamp, s.stamp
    FROM (
        SELECT MAX(?4, COALESCE(
            (SELECT MAX(created_at) FROM rfids WHERE rfid_number = ?1),
            ''
        )) AS stamp
    ) s
    RETURNING id, rfid_number, status, registered, created_at, updated_at
"#;

/// SQLite-backed scan ledger
pub struct SqliteScanLedger {
    pool: SqlitePool,
}

impl SqliteScanLedger {
    /// Create a ledger on an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (e.g. `sqlite://rfid_ledger.db?mode=rwc`)
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory ledger, migrated and ready to use
    pub async fn in_memory() -> Result<Self> {
        // The database lives only as long as its one connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let ledger = Self::new(pool);
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Apply schema migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Internal(format!("Invalid {field}: {e}")))
}

#[async_trait]
impl ScanLedger for SqliteScanLedger {
    #[instrument(skip(self, scan), fields(tag = %scan.tag, status = %scan.status))]
    async fn insert(&self, scan: NewScan) -> Result<ScanRecord> {
        let row = sqlx::query_as::<_, ScanRow>(INSERT_SCAN)
            .bind(scan.tag.as_str())
            .bind(scan.status.as_i64())
            .bind(scan.registered)
            .bind(format_timestamp(Utc::now().trunc_subsecs(6)))
            .fetch_one(&self.pool)
            .await?;

        ScanRecord::try_from(row)
    }

    #[instrument(skip(self), fields(tag = %tag))]
    async fn exists_registered(&self, tag: &TagCode) -> Result<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM rfids WHERE rfid_number = ? AND registered = 1)",
        )
        .bind(tag.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 != 0)
    }

    #[instrument(skip(self), fields(tag = %tag))]
    async fn latest_by_tag(&self, tag: &TagCode) -> Result<Option<ScanRecord>> {
        let query = format!(
            "{SELECT_COLUMNS} WHERE rfid_number = ? ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, ScanRow>(&query)
            .bind(tag.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScanRecord::try_from).transpose()
    }
}

#[async_trait]
impl LedgerAdmin for SqliteScanLedger {
    async fn list(&self) -> Result<Vec<ScanRecord>> {
        let query = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query_as::<_, ScanRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ScanRecord::try_from).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<ScanRecord>> {
        let query = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query_as::<_, ScanRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ScanRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: i64, status: ScanStatus) -> Result<ScanRecord> {
        let stamp = format_timestamp(Utc::now().trunc_subsecs(6));
        let result = sqlx::query("UPDATE rfids SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_i64())
            .bind(&stamp)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::RecordNotFound(id));
        }

        self.get(id).await?.ok_or(LedgerError::RecordNotFound(id))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM rfids WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::RecordNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tag = %tag))]
    async fn register(&self, tag: &TagCode) -> Result<Option<ScanRecord>> {
        let mut tx = self.pool.begin().await?;

        let (exists,): (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM rfids WHERE rfid_number = ? AND registered = 1)",
        )
        .bind(tag.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if exists != 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let seed = NewScan::registration(tag.clone());
        let row = sqlx::query_as::<_, ScanRow>(INSERT_SCAN)
            .bind(seed.tag.as_str())
            .bind(seed.status.as_i64())
            .bind(seed.registered)
            .bind(format_timestamp(Utc::now().trunc_subsecs(6)))
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        ScanRecord::try_from(row).map(Some)
    }

    async fn count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rfids")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }
}

/// Raw row from the rfids table
#[derive(Debug, FromRow)]
struct ScanRow {
    id: i64,
    rfid_number: String,
    status: i64,
    registered: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ScanRow> for ScanRecord {
    type Error = LedgerError;

    fn try_from(row: ScanRow) -> Result<Self> {
        let status =
            ScanStatus::from_i64(row.status).ok_or(LedgerError::InvalidStatus(row.status))?;

        Ok(ScanRecord {
            id: row.id,
            rfid_number: row.rfid_number,
            status,
            registered: row.registered,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        })
    }
}
