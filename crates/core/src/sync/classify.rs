//! Decides whether a failed transaction is worth another attempt.
//!
//! Classification reads driver error text, so it depends on the driver's wording and locale.
//! The rules live behind [`Classifier`] so a store with different wording can swap them.

/// How the upsert engine reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fail the batch now.
    Permanent,
    /// Back off and try again.
    Transient,
    /// Back off, re-initialize the connection, try again.
    ConnectionLost,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

pub type Classifier = fn(&str) -> ErrorKind;

const RETRYABLE_MARKERS: &[&str] = &[
    "deadlock",
    "timeout",
    "connection",
    "restart",
    "try again",
    "lock",
    "concurrent",
    "retry",
    "conflict",
];

const CONNECTION_MARKERS: &[&str] = &["connection", "broken", "reset by peer", "i/o timeout"];

/// Default rules for Postgres/CockroachDB error text. Matching is case-insensitive.
pub fn classify_message(message: &str) -> ErrorKind {
    let msg = message.to_ascii_lowercase();
    if !RETRYABLE_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorKind::Permanent;
    }
    if CONNECTION_MARKERS.iter().any(|m| msg.contains(m)) {
        ErrorKind::ConnectionLost
    } else {
        ErrorKind::Transient
    }
}
