//! Database migrations.
//!
//! Uses SQLx embedded migrations for both backends. The SQLite set is the
//! default single-node deployment; the Postgres set mirrors it.

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{PgPool, SqlitePool};

static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("migrations/postgres");
static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");

pub async fn run_postgres(pool: &PgPool) -> Result<(), MigrateError> {
    POSTGRES_MIGRATOR.run(pool).await
}

pub async fn run_sqlite(pool: &SqlitePool) -> Result<(), MigrateError> {
    SQLITE_MIGRATOR.run(pool).await
}
