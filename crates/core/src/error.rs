use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} is invalid: {detail}")]
    Invalid { key: &'static str, detail: String },
}

/// The database could not be reached, or could not be verified once reached.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("database connection failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("database ping failed")]
    Ping(#[source] sqlx::Error),

    #[error("database ping timed out after {0:?}")]
    PingTimeout(Duration),

    #[error("ensuring database schema failed")]
    Schema(#[source] sqlx::Error),

    #[error("connection attempt cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("RATINGS_API_KEY is missing or empty")]
    MissingCredential,

    #[error("RATINGS_API_KEY is not a valid header value")]
    InvalidCredential,

    #[error("ratings API request failed")]
    Transport(#[source] reqwest::Error),

    #[error("ratings API HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("ratings API response is not a valid page")]
    Decode(#[source] serde_json::Error),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::Status { .. } | FetchError::Decode(_)
        )
    }
}

/// One failed transaction attempt.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("begin transaction failed")]
    Begin(#[source] sqlx::Error),

    #[error("batch upsert failed")]
    Execute(#[source] sqlx::Error),

    #[error("commit transaction failed")]
    Commit(#[source] sqlx::Error),

    #[error("transaction attempt exceeded its {0:?} timeout")]
    TimedOut(Duration),

    #[error("connection check before transaction failed")]
    Liveness(#[source] ConnectionError),

    #[error("transaction cancelled")]
    Cancelled,
}

impl TransactionError {
    pub fn chain_text(&self) -> String {
        error_chain(self)
    }
}

/// Display text of `err` and every source below it, joined with `": "`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(source) = cur {
        out.push_str(": ");
        out.push_str(&source.to_string());
        cur = source.source();
    }
    out
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{failed} of {total} ratings failed to persist ({succeeded} committed)")]
    BatchesFailed {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    #[error("sync cancelled")]
    Cancelled,
}
