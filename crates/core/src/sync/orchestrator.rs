use crate::config::env_or;
use crate::domain::rating::{dedup_by_key, Rating};
use crate::error::{SyncError, TransactionError};
use crate::ingest::fetch::{fetch_all_ratings, FetchOptions};
use crate::ingest::provider::RatingsSource;
use crate::storage::RatingStore;
use crate::sync::batch::{upsert_batch_with_retry, BatchOutcome, UpsertPolicy};
use crate::sync::janitor::{self, run_janitor};
use crate::time::pause;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_pause: Duration,
    /// The janitor runs after every batch whose 0-based index is a multiple of this.
    pub janitor_every: usize,
    pub janitor_settle: Duration,
    pub upsert: UpsertPolicy,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: Duration::from_millis(100),
            janitor_every: 5,
            janitor_settle: janitor::DEFAULT_SETTLE,
            upsert: UpsertPolicy::default(),
        }
    }
}

impl PersistOptions {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("SYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Distinct keys persisted; repeated keys are counted in `duplicates` instead.
    pub total: usize,
    pub duplicates: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

impl PersistSummary {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// Any failed batch turns the whole persist into an error. Committed batches stay committed.
    pub fn into_result(self) -> Result<Self, SyncError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(SyncError::BatchesFailed {
                succeeded: self.succeeded,
                failed: self.failed,
                total: self.total,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub persist: PersistSummary,
}

/// Upserts `ratings` batch by batch. Batches fail independently; the summary counts both sides.
///
/// A key repeated in the input is written once, with its last occurrence.
///
/// Errors only when the store is unreachable before the first batch or the run is cancelled.
pub async fn persist_ratings<S: RatingStore + ?Sized>(
    store: &mut S,
    ratings: &[Rating],
    opts: &PersistOptions,
    cancel: &CancellationToken,
) -> Result<PersistSummary, SyncError> {
    let input_len = ratings.len();
    let ratings = dedup_by_key(ratings);
    let ratings = ratings.as_slice();
    let mut summary = PersistSummary {
        total: ratings.len(),
        ..PersistSummary::default()
    };
    if ratings.is_empty() {
        tracing::info!("no ratings to persist");
        return Ok(summary);
    }

    store.check_connection().await?;

    summary.duplicates = input_len - ratings.len();
    if summary.duplicates > 0 {
        tracing::warn!(
            duplicates = summary.duplicates,
            "repeated (ticker, time) keys collapsed to their last occurrence"
        );
    }

    let batch_size = opts.batch_size.max(1);
    let janitor_every = opts.janitor_every.max(1);
    let n_batches = ratings.len().div_ceil(batch_size);
    tracing::info!(total = ratings.len(), batch_size, batches = n_batches, "persisting ratings");

    for (idx, batch) in ratings.chunks(batch_size).enumerate() {
        tracing::info!(batch = idx + 1, batches = n_batches, size = batch.len(), "processing batch");
        summary.batches += 1;

        match upsert_batch_with_retry(store, batch, &opts.upsert, cancel).await {
            BatchOutcome::Committed { .. } => summary.succeeded += batch.len(),
            BatchOutcome::Failed {
                error: TransactionError::Cancelled,
                ..
            } => return Err(SyncError::Cancelled),
            BatchOutcome::Failed { attempts, error } => {
                summary.failed += batch.len();
                summary.failed_batches += 1;
                tracing::error!(
                    batch = idx + 1,
                    attempts,
                    size = batch.len(),
                    error = %error.chain_text(),
                    "batch failed; continuing with remaining batches"
                );
            }
        }

        if idx + 1 < n_batches {
            pause(opts.batch_pause, cancel)
                .await
                .map_err(|_| SyncError::Cancelled)?;

            if idx % janitor_every == 0 {
                run_janitor(store, opts.janitor_settle, cancel)
                    .await
                    .map_err(|_| SyncError::Cancelled)?;
                if let Err(err) = store.check_connection().await {
                    tracing::warn!(error = %err, "connection check between batches failed");
                }
            }
        }
    }

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        failed_batches = summary.failed_batches,
        "persist completed"
    );
    Ok(summary)
}

/// Fetches every page, then persists the result. A fetch failure aborts before any write.
pub async fn run_sync<R, S>(
    source: &R,
    store: &mut S,
    fetch_opts: &FetchOptions,
    persist_opts: &PersistOptions,
    cancel: &CancellationToken,
) -> Result<SyncReport, SyncError>
where
    R: RatingsSource + ?Sized,
    S: RatingStore + ?Sized,
{
    let fetched = fetch_all_ratings(source, fetch_opts, cancel).await?;
    tracing::info!(
        pages = fetched.pages,
        ratings = fetched.ratings.len(),
        skipped = fetched.skipped,
        "fetched all ratings"
    );

    let persist = persist_ratings(store, &fetched.ratings, persist_opts, cancel)
        .await?
        .into_result()?;

    Ok(SyncReport {
        pages: fetched.pages,
        fetched: fetched.ratings.len(),
        skipped: fetched.skipped,
        persist,
    })
}
