use crate::config::{env_or, Settings};
use crate::domain::rating::Page;
use crate::error::FetchError;
use crate::ingest::types::RatingsPageResponse;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const BODY_PREVIEW_CHARS: usize = 512;

/// A remote listing that serves ratings one page at a time.
#[async_trait::async_trait]
pub trait RatingsSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Fetches the page addressed by `cursor` (empty for the first page). One attempt, no retry.
    async fn fetch_page(&self, cursor: &str) -> Result<Page, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpRatingsSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRatingsSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout_secs = env_or("RATINGS_HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build ratings http client")?;

        Ok(Self {
            http,
            base_url: settings.ratings_api_base_url().to_string(),
            api_key: settings.ratings_api_key.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(FetchError::MissingCredential)?;

        // The credential already carries its scheme ("Bearer ..."), so it is sent verbatim.
        let mut auth = HeaderValue::from_str(api_key).map_err(|_| FetchError::InvalidCredential)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl RatingsSource for HttpRatingsSource {
    fn source_name(&self) -> &'static str {
        "ratings_http_json"
    }

    async fn fetch_page(&self, cursor: &str) -> Result<Page, FetchError> {
        let headers = self.headers()?;

        let mut req = self.http.get(&self.base_url).headers(headers);
        if !cursor.is_empty() {
            req = req.query(&[("next_page", cursor)]);
        }

        tracing::debug!(url = %self.base_url, cursor, "fetching ratings page");

        let res = req.send().await.map_err(FetchError::Transport)?;
        let status = res.status();
        let text = res.text().await.map_err(FetchError::Transport)?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: preview(&text),
            });
        }

        tracing::debug!(bytes = text.len(), "received ratings page");

        let parsed = serde_json::from_str::<RatingsPageResponse>(&text).map_err(|err| {
            tracing::warn!(error = %err, body = %preview(&text), "ratings page did not decode");
            FetchError::Decode(err)
        })?;

        Ok(parsed.into())
    }
}

fn preview(text: &str) -> String {
    text.chars().take(BODY_PREVIEW_CHARS).collect()
}
