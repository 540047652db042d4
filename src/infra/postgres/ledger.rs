//! PostgreSQL scan ledger
//!
//! Same contract as the SQLite ledger. `created_at` is a `TIMESTAMPTZ`
//! assigned at insert time with microsecond precision, clamped so it is
//! monotonic per tag.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::instrument;

use crate::domain::{NewScan, ScanRecord, ScanStatus, TagCode};
use crate::infra::{LedgerAdmin, LedgerError, Result, ScanLedger};

/// Appends one row. `created_at` never falls behind the newest row already
/// stored for the tag, so a clock stepping backwards cannot reorder the tail.
const INSERT_SCAN: &str = r#"
    INSERT INTO rfids (rfid_number, status, registered, created_at, updated_at)
    SELECT $1::text, $2::int4, $3::bool, s.stamp, s.stamp
    FROM (
        SELECT GREATEST(
            $4::timestamptz,
            (SELECT MAX(created_at) FROM rfids WHERE rfid_number = $1::text)
        ) AS stamp
    ) s
    RETURNING id, rfid_number, status, registered, created_at, updated_at
"#;

/// PostgreSQL-backed scan ledger
pub struct PgScanLedger {
    pool: PgPool,
}

impl PgScanLedger {
    /// Create a ledger on an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a PostgreSQL URL
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply schema migrations
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_postgres(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ScanLedger for PgScanLedger {
    #[instrument(skip(self, scan), fields(tag = %scan.tag, status = %scan.status))]
    async fn insert(&self, scan: NewScan) -> Result<ScanRecord> {
        let row = sqlx::query_as::<_, ScanRow>(INSERT_SCAN)
            .bind(scan.tag.as_str())
            .bind(scan.status.as_i64() as i32)
            .bind(scan.registered)
            .bind(Utc::now().trunc_subsecs(6))
            .fetch_one(&self.pool)
            .await?;

        ScanRecord::try_from(row)
    }

    #[instrument(skip(self), fields(tag = %tag))]
    async fn exists_registered(&self, tag: &TagCode) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM rfids WHERE rfid_number = $1 AND registered)",
        )
        .bind(tag.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    #[instrument(skip(self), fields(tag = %tag))]
    async fn latest_by_tag(&self, tag: &TagCode) -> Result<Option<ScanRecord>> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT id, rfid_number, status, registered, created_at, updated_at
            FROM rfids
            WHERE rfid_number = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(tag.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScanRecord::try_from).transpose()
    }
}

#[async_trait]
impl LedgerAdmin for PgScanLedger {
    async fn list(&self) -> Result<Vec<ScanRecord>> {
        let rows = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT id, rfid_number, status, registered, created_at, updated_at
            FROM rfids
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScanRecord::try_from).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<ScanRecord>> {
        let row = sqlx::query_as::<_, ScanRow>(
            "SELECT id, rfid_number, status, registered, created_at, updated_at FROM rfids WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScanRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: i64, status: ScanStatus) -> Result<ScanRecord> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"
            UPDATE rfids
            SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, rfid_number, status, registered, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_i64() as i32)
        .bind(Utc::now().trunc_subsecs(6))
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScanRecord::try_from)
            .transpose()?
            .ok_or(LedgerError::RecordNotFound(id))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM rfids WHERE id = $1")
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

        // Serialize concurrent registrations of the same tag.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(tag.as_str())
            .execute(&mut *tx)
            .await?;

        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM rfids WHERE rfid_number = $1 AND registered)",
        )
        .bind(tag.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if exists {
            tx.rollback().await?;
            return Ok(None);
        }

        let seed = NewScan::registration(tag.clone());
        let row = sqlx::query_as::<_, ScanRow>(INSERT_SCAN)
            .bind(seed.tag.as_str())
            .bind(seed.status.as_i64() as i32)
            .bind(seed.registered)
            .bind(Utc::now().trunc_subsecs(6))
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

#[derive(Debug, FromRow)]
struct ScanRow {
    id: i64,
    rfid_number: String,
    status: i32,
    registered: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScanRow> for ScanRecord {
    type Error = LedgerError;

    fn try_from(row: ScanRow) -> Result<Self> {
        let status = ScanStatus::from_i64(row.status as i64)
            .ok_or(LedgerError::InvalidStatus(row.status as i64))?;

        Ok(ScanRecord {
            id: row.id,
            rfid_number: row.rfid_number,
            status,
            registered: row.registered,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
