//! Environment-driven crawl configuration.

use std::time::Duration;

use crate::CrawlError;

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API. When unset, `https://<credential provider>` is used.
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            max_attempts: 5,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Read `HARVEST_API_URL`, `HARVEST_API_TIMEOUT_SECS`,
    /// `HARVEST_API_MAX_ATTEMPTS` and `HARVEST_API_BACKOFF_MS`.
    pub fn from_env() -> Result<Self, CrawlError> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env("HARVEST_API_URL").map(|url| url.trim_end_matches('/').to_string()),
            timeout: env_parse("HARVEST_API_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_attempts: env_parse("HARVEST_API_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts)
                .max(1),
            backoff: env_parse("HARVEST_API_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            max_backoff: defaults.max_backoff,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Crawl tuning.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// `first` argument for cursor-paginated queries.
    pub page_size: u32,
    /// `per_page` for commit listing.
    pub commit_page_size: u32,
    /// Items of one page enhanced at the same time.
    pub enhance_concurrency: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            commit_page_size: 100,
            enhance_concurrency: 8,
        }
    }
}

impl CrawlConfig {
    /// Read `HARVEST_PAGE_SIZE`, `HARVEST_COMMIT_PAGE_SIZE` and
    /// `HARVEST_ENHANCE_CONCURRENCY`.
    pub fn from_env() -> Result<Self, CrawlError> {
        let defaults = Self::default();
        Ok(Self {
            page_size: env_parse("HARVEST_PAGE_SIZE")?
                .unwrap_or(defaults.page_size)
                .max(1),
            commit_page_size: env_parse("HARVEST_COMMIT_PAGE_SIZE")?
                .unwrap_or(defaults.commit_page_size)
                .max(1),
            enhance_concurrency: env_parse("HARVEST_ENHANCE_CONCURRENCY")?
                .unwrap_or(defaults.enhance_concurrency)
                .max(1),
        })
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CrawlError> {
    env(name)
        .map(|raw| {
            raw.parse()
                .map_err(|_| CrawlError::Config(format!("{name} is not a valid number: {raw}")))
        })
        .transpose()
}
