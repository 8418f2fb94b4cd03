use anyhow::Context;
use clap::Parser;
use ratingsync_core::config::Settings;
use ratingsync_core::error::{error_chain, SyncError};
use ratingsync_core::ingest::fetch::{fetch_all_ratings, FetchOptions};
use ratingsync_core::ingest::provider::HttpRatingsSource;
use ratingsync_core::storage::connection::{ConnectionManager, ConnectionOptions};
use ratingsync_core::storage::runs::{record_sync_run, SyncRunRecord, SyncRunStatus};
use ratingsync_core::sync::{run_sync, PersistOptions, SyncReport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const INIT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "ratingsync_worker")]
struct Args {
    /// Fetch every page and report counts without touching the database.
    #[arg(long)]
    dry_run: bool,

    /// Ratings per upsert transaction. Overrides SYNC_BATCH_SIZE.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    // Run in a separate task so a panic comes back as a JoinError instead of unwinding main.
    let handle = tokio::spawn(run(args, settings, cancel));
    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %format!("{err:#}"), "rating sync failed");
            Err(err)
        }
        Err(join_err) => {
            let detail = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "sync task was cancelled".to_string()
            };
            tracing::error!(%detail, "rating sync task aborted");
            Err(anyhow::anyhow!("rating sync task aborted: {detail}"))
        }
    }
}

async fn run(args: Args, settings: Settings, cancel: CancellationToken) -> anyhow::Result<()> {
    settings.require_ratings_api_key()?;

    let source = HttpRatingsSource::from_settings(&settings)?;
    let fetch_opts = FetchOptions::from_env();
    let mut persist_opts = PersistOptions::from_env();
    if let Some(n) = args.batch_size {
        anyhow::ensure!(n >= 1, "--batch-size must be >= 1 (got {n})");
        persist_opts.batch_size = n;
    }

    if args.dry_run {
        let fetched = fetch_all_ratings(&source, &fetch_opts, &cancel)
            .await
            .context("fetching ratings failed")?;
        tracing::info!(
            dry_run = true,
            pages = fetched.pages,
            ratings = fetched.ratings.len(),
            skipped = fetched.skipped,
            "fetched ratings; database writes skipped"
        );
        return Ok(());
    }

    let started_at = chrono::Utc::now();
    let mut manager =
        ConnectionManager::new(ConnectionOptions::from_settings(&settings)?, cancel.clone());

    if let Err(err) = manager.initialize().await {
        tracing::warn!(error = %err, delay = ?INIT_RETRY_DELAY, "database initialization failed; trying once more");
        ratingsync_core::time::pause(INIT_RETRY_DELAY, &cancel)
            .await
            .map_err(|_| anyhow::anyhow!("cancelled while waiting to retry database initialization"))?;
        manager
            .initialize()
            .await
            .context("database initialization failed")?;
    }

    let result = run_sync(&source, &mut manager, &fetch_opts, &persist_opts, &cancel).await;

    if let Some(pool) = manager.pool() {
        let run = sync_run_record(started_at, &result);
        match record_sync_run(pool, &run).await {
            Ok(run_id) => tracing::info!(%run_id, status = run.status.as_str(), "recorded sync run"),
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "failed to record sync run"),
        }
    }
    manager.close().await;

    let report = result.context("rating sync failed")?;
    tracing::info!(
        pages = report.pages,
        fetched = report.fetched,
        skipped = report.skipped,
        succeeded = report.persist.succeeded,
        duplicates = report.persist.duplicates,
        batches = report.persist.batches,
        "rating sync completed"
    );
    Ok(())
}

fn sync_run_record(
    started_at: chrono::DateTime<chrono::Utc>,
    result: &Result<SyncReport, SyncError>,
) -> SyncRunRecord {
    let err = match result {
        Ok(report) => {
            let mut run = SyncRunRecord::new(started_at, SyncRunStatus::Success);
            run.fetched = report.fetched;
            run.succeeded = report.persist.succeeded;
            return run;
        }
        Err(err) => err,
    };

    let mut run = if let SyncError::BatchesFailed {
        succeeded,
        failed,
        total,
    } = err
    {
        let mut run = SyncRunRecord::new(started_at, SyncRunStatus::Partial);
        run.fetched = *total;
        run.succeeded = *succeeded;
        run.failed = *failed;
        run
    } else {
        SyncRunRecord::new(started_at, SyncRunStatus::Error)
    };
    run.error = Some(error_chain(err));
    run
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("ctrl-c received; cancelling sync");
        cancel.cancel();
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratingsync_core::sync::PersistSummary;

    #[test]
    fn partial_failure_is_recorded_with_counts() {
        let started = chrono::Utc::now();
        let result: Result<SyncReport, SyncError> = Err(SyncError::BatchesFailed {
            succeeded: 50,
            failed: 25,
            total: 75,
        });

        let run = sync_run_record(started, &result);
        assert_eq!(run.status, SyncRunStatus::Partial);
        assert_eq!((run.fetched, run.succeeded, run.failed), (75, 50, 25));
        assert!(run.error.unwrap().contains("25 of 75"));
    }

    #[test]
    fn success_is_recorded_without_error() {
        let report = SyncReport {
            pages: 2,
            fetched: 30,
            skipped: 0,
            persist: PersistSummary {
                total: 30,
                duplicates: 0,
                succeeded: 30,
                failed: 0,
                batches: 2,
                failed_batches: 0,
            },
        };

        let run = sync_run_record(chrono::Utc::now(), &Ok(report));
        assert_eq!(run.status, SyncRunStatus::Success);
        assert_eq!(run.succeeded, 30);
        assert!(run.error.is_none());
    }

    #[test]
    fn parses_flags() {
        let args = Args::parse_from(["ratingsync_worker", "--dry-run", "--batch-size", "10"]);
        assert!(args.dry_run);
        assert_eq!(args.batch_size, Some(10));
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
