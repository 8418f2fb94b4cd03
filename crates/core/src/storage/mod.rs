pub mod connection;
pub mod ratings;
pub mod runs;

use crate::domain::rating::Rating;
use crate::error::{ConnectionError, TransactionError};
use std::time::Duration;

pub const SYNC_RUNS_TABLE: &str = "rating_sync_runs";

/// Connection pool occupancy, for logs only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
}

/// Destination of fetched ratings.
///
/// Methods take `&mut self` because a reconnect replaces the underlying handle. Callers that want
/// to upsert batches in parallel must put the store behind a mutex.
#[async_trait::async_trait]
pub trait RatingStore: Send {
    /// Pings the current handle, re-initializing it when missing or dead.
    async fn check_connection(&mut self) -> Result<(), ConnectionError>;

    /// Drops the current handle and establishes a new one.
    async fn reinitialize(&mut self) -> Result<(), ConnectionError>;

    /// Upserts `batch` in one transaction that must finish within `timeout`.
    async fn upsert_batch(
        &mut self,
        batch: &[Rating],
        timeout: Duration,
    ) -> Result<u64, TransactionError>;

    /// Closes idle connections and reports what is left open.
    async fn release_idle(&mut self) -> PoolStats;

    fn pool_stats(&self) -> PoolStats;
}

/// Creates the ratings table, its ticker index and the run ledger when absent. Never drops.
pub async fn ensure_schema(pool: &sqlx::PgPool, table: &str) -> Result<(), sqlx::Error> {
    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {table} ( \
            ticker TEXT NOT NULL, \
            company TEXT, \
            brokerage TEXT, \
            action TEXT, \
            rating_from TEXT, \
            rating_to TEXT, \
            target_from TEXT, \
            target_to TEXT, \
            time TEXT NOT NULL, \
            PRIMARY KEY (ticker, time) \
        )"
    );
    let create_index = format!("CREATE INDEX IF NOT EXISTS idx_{table}_ticker ON {table} (ticker)");
    let create_runs = format!(
        "CREATE TABLE IF NOT EXISTS {SYNC_RUNS_TABLE} ( \
            id UUID PRIMARY KEY, \
            started_at TIMESTAMPTZ NOT NULL, \
            finished_at TIMESTAMPTZ NOT NULL, \
            status TEXT NOT NULL, \
            fetched BIGINT NOT NULL, \
            succeeded BIGINT NOT NULL, \
            failed BIGINT NOT NULL, \
            error TEXT \
        )"
    );

    for ddl in [&create_table, &create_index, &create_runs] {
        sqlx::query(ddl).persistent(false).execute(pool).await?;
    }

    tracing::debug!(table, "database schema ensured");
    Ok(())
}
