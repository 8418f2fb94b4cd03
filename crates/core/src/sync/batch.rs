use crate::domain::rating::Rating;
use crate::error::TransactionError;
use crate::storage::RatingStore;
use crate::sync::classify::{classify_message, Classifier, ErrorKind};
use crate::time::{exponential_backoff, pause};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const SAMPLE_ON_FAILURE: usize = 3;

#[derive(Debug, Clone)]
pub struct UpsertPolicy {
    pub max_attempts: u32,
    /// Attempt `n` gets `n * base_timeout` to finish its transaction.
    pub base_timeout: Duration,
    pub backoff_base: Duration,
    pub classifier: Classifier,
}

impl Default for UpsertPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            classifier: classify_message,
        }
    }
}

impl UpsertPolicy {
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        self.base_timeout.saturating_mul(attempt.max(1))
    }

    pub fn kind_of(&self, err: &TransactionError) -> ErrorKind {
        match err {
            TransactionError::Cancelled => ErrorKind::Permanent,
            TransactionError::TimedOut(_) => ErrorKind::Transient,
            // The liveness check already tried to re-initialize.
            TransactionError::Liveness(_) => ErrorKind::Transient,
            _ => (self.classifier)(&err.chain_text()),
        }
    }
}

#[derive(Debug)]
pub enum BatchOutcome {
    Committed { attempts: u32, rows_affected: u64 },
    Failed { attempts: u32, error: TransactionError },
}

impl BatchOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, BatchOutcome::Committed { .. })
    }
}

/// Commits `batch` as one transaction, retrying transient failures with growing timeouts.
pub async fn upsert_batch_with_retry<S: RatingStore + ?Sized>(
    store: &mut S,
    batch: &[Rating],
    policy: &UpsertPolicy,
    cancel: &CancellationToken,
) -> BatchOutcome {
    if batch.is_empty() {
        return BatchOutcome::Committed {
            attempts: 0,
            rows_affected: 0,
        };
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let timeout = policy.attempt_timeout(attempt);
        tracing::debug!(attempt, max_attempts, ?timeout, batch_size = batch.len(), "upserting batch");

        let res = match store.check_connection().await {
            Ok(()) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TransactionError::Cancelled),
                    res = store.upsert_batch(batch, timeout) => res,
                }
            }
            Err(err) => Err(TransactionError::Liveness(err)),
        };

        let err = match res {
            Ok(rows_affected) => {
                tracing::info!(attempt, batch_size = batch.len(), rows_affected, "batch committed");
                return BatchOutcome::Committed {
                    attempts: attempt,
                    rows_affected,
                };
            }
            Err(err) => err,
        };

        let kind = policy.kind_of(&err);
        tracing::warn!(
            attempt,
            max_attempts,
            ?kind,
            error = %err.chain_text(),
            "batch transaction failed"
        );

        if !kind.is_retryable() || attempt >= max_attempts {
            log_sample(batch);
            return BatchOutcome::Failed {
                attempts: attempt,
                error: err,
            };
        }

        if kind == ErrorKind::ConnectionLost {
            match store.reinitialize().await {
                Ok(()) => tracing::info!("reconnected; retrying batch"),
                Err(err) => tracing::warn!(error = %err, "reconnect failed; retrying batch anyway"),
            }
        }

        let backoff = exponential_backoff(policy.backoff_base, attempt);
        tracing::debug!(?backoff, "backing off before next batch attempt");
        if pause(backoff, cancel).await.is_err() {
            return BatchOutcome::Failed {
                attempts: attempt,
                error: TransactionError::Cancelled,
            };
        }
    }
}

fn log_sample(batch: &[Rating]) {
    for (idx, r) in batch.iter().take(SAMPLE_ON_FAILURE).enumerate() {
        tracing::warn!(idx, ticker = %r.ticker, company = %r.company, time = %r.time, "failed batch sample");
    }
}
