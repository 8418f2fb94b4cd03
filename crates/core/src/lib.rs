pub mod domain;
pub mod error;
pub mod ingest;
pub mod storage;
pub mod sync;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub mod config {
    use crate::error::ConfigError;

    pub const DEFAULT_DATABASE_URL: &str =
        "postgresql://root@localhost:26257/defaultdb?sslmode=disable";
    pub const DEFAULT_RATINGS_API_BASE_URL: &str =
        "https://8j5baasof2.execute-api.us-west-2.amazonaws.com/production/swechallenge/list";
    pub const DEFAULT_RATINGS_TABLE: &str = "stocks";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub ratings_api_key: Option<String>,
        pub ratings_api_base_url: Option<String>,
        pub ratings_table: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                ratings_api_key: non_empty_var("RATINGS_API_KEY"),
                ratings_api_base_url: non_empty_var("RATINGS_API_BASE_URL"),
                ratings_table: non_empty_var("RATINGS_TABLE"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        /// Falls back to the local CockroachDB default when `DATABASE_URL` is unset.
        pub fn database_url(&self) -> &str {
            match self.database_url.as_deref() {
                Some(url) => url,
                None => {
                    tracing::info!("DATABASE_URL not set; using local default");
                    DEFAULT_DATABASE_URL
                }
            }
        }

        pub fn require_ratings_api_key(&self) -> Result<&str, ConfigError> {
            self.ratings_api_key
                .as_deref()
                .ok_or(ConfigError::Missing("RATINGS_API_KEY"))
        }

        pub fn ratings_api_base_url(&self) -> &str {
            self.ratings_api_base_url
                .as_deref()
                .unwrap_or(DEFAULT_RATINGS_API_BASE_URL)
        }

        pub fn ratings_table(&self) -> Result<&str, ConfigError> {
            let table = self
                .ratings_table
                .as_deref()
                .unwrap_or(DEFAULT_RATINGS_TABLE);
            if !is_plain_identifier(table) {
                return Err(ConfigError::Invalid {
                    key: "RATINGS_TABLE",
                    detail: format!("{table:?} is not a plain SQL identifier"),
                });
            }
            Ok(table)
        }
    }

    /// Reads a numeric tuning knob, keeping `default` when unset or unparsable.
    pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    pub(crate) fn is_plain_identifier(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

}
