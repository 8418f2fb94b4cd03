use crate::storage::{PoolStats, RatingStore};
use crate::time::{pause, Cancelled};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Closes idle connections, logs what is left open and lets the database settle.
pub async fn run_janitor<S: RatingStore + ?Sized>(
    store: &mut S,
    settle: Duration,
    cancel: &CancellationToken,
) -> Result<PoolStats, Cancelled> {
    let before = store.pool_stats();
    let after = store.release_idle().await;

    tracing::info!(
        open = after.open,
        in_use = after.in_use,
        idle = after.idle,
        released = before.idle.saturating_sub(after.idle),
        "connection pool after cleanup"
    );

    pause(settle, cancel).await?;
    Ok(after)
}
