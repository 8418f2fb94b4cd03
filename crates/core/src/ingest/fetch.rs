use crate::config::env_or;
use crate::domain::rating::{Page, Rating};
use crate::error::FetchError;
use crate::ingest::provider::RatingsSource;
use crate::time::{exponential_backoff, pause};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_PAGE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Attempts per page, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Pause between consecutive pages.
    pub page_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRIES,
            backoff_base: Duration::from_secs(1),
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
        }
    }
}

impl FetchOptions {
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_or("RATINGS_FETCH_RETRIES", DEFAULT_RETRIES).max(1),
            page_delay: Duration::from_millis(env_or("RATINGS_PAGE_DELAY_MS", DEFAULT_PAGE_DELAY_MS)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedRatings {
    pub ratings: Vec<Rating>,
    pub pages: usize,
    /// Items dropped because their ticker or time was blank.
    pub skipped: usize,
}

pub async fn fetch_page_with_retry<S: RatingsSource + ?Sized>(
    source: &S,
    cursor: &str,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<Page, FetchError> {
    let max_attempts = opts.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            res = source.fetch_page(cursor) => res,
        };

        match res {
            Ok(page) => return Ok(page),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_attempts {
                    return Err(err);
                }
                let backoff = exponential_backoff(opts.backoff_base, attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    ?backoff,
                    cursor,
                    error = %err,
                    "ratings page fetch failed; retrying"
                );
                pause(backoff, cancel)
                    .await
                    .map_err(|_| FetchError::Cancelled)?;
            }
        }
    }
}

/// Follows `next_page` cursors until an empty one. Any page that exhausts its retries fails the
/// whole fetch.
pub async fn fetch_all_ratings<S: RatingsSource + ?Sized>(
    source: &S,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<FetchedRatings, FetchError> {
    let mut out = FetchedRatings::default();
    let mut cursor = String::new();

    loop {
        let page = fetch_page_with_retry(source, &cursor, opts, cancel).await?;
        out.pages += 1;
        let is_last = page.is_last();

        for item in page.items {
            if item.has_valid_key() {
                out.ratings.push(item);
            } else {
                out.skipped += 1;
                tracing::warn!(ticker = %item.ticker, time = %item.time, "skipping rating without ticker/time");
            }
        }

        tracing::info!(
            source = source.source_name(),
            pages = out.pages,
            ratings = out.ratings.len(),
            skipped = out.skipped,
            "ratings fetch progress"
        );

        if is_last {
            break;
        }
        cursor = page.next_page;

        pause(opts.page_delay, cancel)
            .await
            .map_err(|_| FetchError::Cancelled)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rating, ScriptedSource};
    use tokio::time::Instant;

    fn server_error() -> FetchError {
        FetchError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    fn page(tickers: &[&str], next: &str) -> Page {
        Page {
            items: tickers.iter().map(|t| rating(t, "2025-01-13T00:30:05Z")).collect(),
            next_page: next.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_doubling_backoff_until_success() {
        let source = ScriptedSource::new(vec![
            Err(server_error()),
            Err(server_error()),
            Ok(page(&["AAPL"], "")),
        ]);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let got = fetch_page_with_retry(&source, "", &FetchOptions::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(got.items.len(), 1);
        assert_eq!(source.calls(), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempt_budget() {
        let source = ScriptedSource::new(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
            Ok(page(&["AAPL"], "")),
        ]);
        let cancel = CancellationToken::new();

        let err = fetch_page_with_retry(&source, "", &FetchOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_aborts_without_retry() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::MissingCredential),
            Ok(page(&["AAPL"], "")),
        ]);
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let err = fetch_page_with_retry(&source, "", &FetchOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MissingCredential));
        assert_eq!(source.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn follows_cursors_in_order_until_empty() {
        let source = ScriptedSource::new(vec![
            Ok(page(&["A1", "A2"], "a")),
            Ok(page(&["B1"], "b")),
            Ok(page(&["C1", "C2"], "")),
            Ok(page(&["NEVER"], "")),
        ]);
        let cancel = CancellationToken::new();

        let got = fetch_all_ratings(&source, &FetchOptions::default(), &cancel)
            .await
            .unwrap();

        let tickers: Vec<_> = got.ratings.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["A1", "A2", "B1", "C1", "C2"]);
        assert_eq!(got.pages, 3);
        assert_eq!(source.cursors(), vec!["", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn page_failure_discards_earlier_pages() {
        let source = ScriptedSource::new(vec![
            Ok(page(&["A1"], "a")),
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
        ]);
        let cancel = CancellationToken::new();

        let res = fetch_all_ratings(&source, &FetchOptions::default(), &cancel).await;
        assert!(matches!(res, Err(FetchError::Status { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn drops_items_with_blank_keys() {
        let mut first = page(&["A1", ""], "");
        first.items[0].time = String::new();
        first.items.push(rating("B1", "2025-01-14T00:00:00Z"));
        let source = ScriptedSource::new(vec![Ok(first)]);
        let cancel = CancellationToken::new();

        let got = fetch_all_ratings(&source, &FetchOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(got.skipped, 2);
        assert_eq!(got.ratings.len(), 1);
        assert_eq!(got.ratings[0].ticker, "B1");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_backoff() {
        let source = ScriptedSource::new(vec![Err(server_error()), Ok(page(&["A"], ""))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetch_page_with_retry(&source, "", &FetchOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
