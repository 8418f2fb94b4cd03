//! In-memory doubles for the remote listing and the database.

use crate::domain::rating::{Page, Rating};
use crate::error::{ConnectionError, FetchError, TransactionError};
use crate::ingest::provider::RatingsSource;
use crate::storage::{PoolStats, RatingStore};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn rating(ticker: &str, time: &str) -> Rating {
    Rating {
        ticker: ticker.to_string(),
        company: format!("{ticker} Inc."),
        brokerage: "Benchmark".to_string(),
        action: "upgraded by".to_string(),
        rating_from: "Neutral".to_string(),
        rating_to: "Buy".to_string(),
        target_from: Some("$10.00".to_string()),
        target_to: Some("$12.00".to_string()),
        time: time.to_string(),
    }
}

/// Serves scripted results in order; an exhausted script serves an empty last page.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Page, FetchError>>>,
    cursors: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Page, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.cursors.lock().unwrap().len()
    }

    pub fn cursors(&self) -> Vec<String> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RatingsSource for ScriptedSource {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_page(&self, cursor: &str) -> Result<Page, FetchError> {
        self.cursors.lock().unwrap().push(cursor.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }
}

/// A store keyed on `(ticker, time)` with scriptable failures.
#[derive(Default)]
pub struct FakeStore {
    pub rows: BTreeMap<(String, String), Rating>,
    pub stats: PoolStats,
    pub upsert_timeouts: Vec<Duration>,
    pub liveness_checks: usize,
    pub liveness_failures: usize,
    pub reinitializations: usize,
    pub reconnect_fails: bool,
    pub janitor_runs: usize,
    /// Cancels the token once this many upserts have committed.
    pub cancel_after_upserts: Option<(usize, CancellationToken)>,
    next_failures: VecDeque<String>,
    always_fail: Option<String>,
    fail_containing: Option<(String, String)>,
    commits: usize,
}

impl FakeStore {
    pub fn fail_next(&mut self, message: &str) {
        self.next_failures.push_back(message.to_string());
    }

    pub fn fail_always(&mut self, message: &str) {
        self.always_fail = Some(message.to_string());
    }

    pub fn fail_batches_containing(&mut self, ticker: &str, message: &str) {
        self.fail_containing = Some((ticker.to_string(), message.to_string()));
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.rows.keys().any(|(t, _)| t == ticker)
    }

    fn scripted_failure(&mut self, batch: &[Rating]) -> Option<String> {
        if let Some(msg) = self.next_failures.pop_front() {
            return Some(msg);
        }
        if let Some(msg) = &self.always_fail {
            return Some(msg.clone());
        }
        match &self.fail_containing {
            Some((ticker, msg)) if batch.iter().any(|r| &r.ticker == ticker) => Some(msg.clone()),
            _ => None,
        }
    }
}

fn driver_error(message: String) -> sqlx::Error {
    sqlx::Error::Protocol(message)
}

#[async_trait::async_trait]
impl RatingStore for FakeStore {
    async fn check_connection(&mut self) -> Result<(), ConnectionError> {
        self.liveness_checks += 1;
        if self.liveness_failures > 0 {
            self.liveness_failures -= 1;
            return Err(ConnectionError::PingTimeout(Duration::from_secs(3)));
        }
        Ok(())
    }

    async fn reinitialize(&mut self) -> Result<(), ConnectionError> {
        self.reinitializations += 1;
        if self.reconnect_fails {
            return Err(ConnectionError::Ping(driver_error("connection refused".into())));
        }
        Ok(())
    }

    async fn upsert_batch(
        &mut self,
        batch: &[Rating],
        timeout: Duration,
    ) -> Result<u64, TransactionError> {
        self.upsert_timeouts.push(timeout);
        if let Some(msg) = self.scripted_failure(batch) {
            return Err(TransactionError::Execute(driver_error(msg)));
        }

        for r in batch {
            let (ticker, time) = r.key();
            self.rows
                .insert((ticker.to_string(), time.to_string()), r.clone());
        }
        self.commits += 1;
        if let Some((after, token)) = &self.cancel_after_upserts {
            if self.commits >= *after {
                token.cancel();
            }
        }
        Ok(batch.len() as u64)
    }

    async fn release_idle(&mut self) -> PoolStats {
        self.janitor_runs += 1;
        self.stats.open = self.stats.open.saturating_sub(self.stats.idle);
        self.stats.idle = 0;
        self.stats
    }

    fn pool_stats(&self) -> PoolStats {
        self.stats
    }
}
