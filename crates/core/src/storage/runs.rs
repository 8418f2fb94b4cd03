use crate::storage::SYNC_RUNS_TABLE;
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRunStatus {
    Success,
    /// Some batches committed, others failed.
    Partial,
    Error,
}

impl SyncRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncRunStatus::Success => "success",
            SyncRunStatus::Partial => "partial",
            SyncRunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SyncRunStatus,
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl SyncRunRecord {
    pub fn new(started_at: DateTime<Utc>, status: SyncRunStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            status,
            fetched: 0,
            succeeded: 0,
            failed: 0,
            error: None,
        }
    }
}

pub async fn record_sync_run(pool: &sqlx::PgPool, run: &SyncRunRecord) -> anyhow::Result<Uuid> {
    let sql = format!(
        "INSERT INTO {SYNC_RUNS_TABLE} (id, started_at, finished_at, status, fetched, succeeded, failed, error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    );

    sqlx::query(&sql)
        .persistent(false)
        .bind(run.id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(run.fetched as i64)
        .bind(run.succeeded as i64)
        .bind(run.failed as i64)
        .bind(run.error.as_deref())
        .execute(pool)
        .await
        .with_context(|| format!("insert {SYNC_RUNS_TABLE} failed"))?;

    Ok(run.id)
}
