pub mod batch;
pub mod classify;
pub mod janitor;
pub mod orchestrator;

pub use orchestrator::{persist_ratings, run_sync, PersistOptions, PersistSummary, SyncReport};
