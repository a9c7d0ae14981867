use crate::error::{AppError, Result};

pub const MARKETPLACE_API_URL: &str = "https://marketplace.example.com/api/v2";

/// Refresh cycle interval (seconds) — how often the pipeline re-polls the catalog.
pub const REFRESH_INTERVAL_SECS: u64 = 300;

/// Retry backoff values per page request, in milliseconds. Attempts are
/// bounded by the schedule length; exhaustion aborts the cycle.
pub const FETCH_BACKOFF_MS: &[u64] = &[500, 1_000, 2_000, 4_000];

/// Concurrent page fetches after the first page reveals the page count.
pub const FETCH_CONCURRENCY: usize = 4;

/// Per-request timeout (seconds). Bounds total cycle duration together with
/// the backoff schedule.
pub const FETCH_TIMEOUT_SECS: u64 = 15;

/// Channel capacity for manual refresh triggers.
pub const CHANNEL_CAPACITY: usize = 16;

/// /health reports degraded once the snapshot is older than this (seconds).
pub const SNAPSHOT_STALE_AFTER_SECS: u64 = 3 * REFRESH_INTERVAL_SECS;

#[derive(Debug, Clone)]
pub struct Config {
    pub marketplace_api_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// Search text sent to the catalog endpoint (SEARCH_TEXT)
    pub search_text: String,
    /// Optional catalog category filter (SEARCH_CATEGORY)
    pub search_category: Option<String>,
    /// Listings priced below this are excluded server-side (SEARCH_MIN_PRICE)
    pub search_min_price: Option<f64>,
    /// Listings priced above this are excluded server-side (SEARCH_MAX_PRICE)
    pub search_max_price: Option<f64>,
    /// Stop paging once this many records were fetched (SEARCH_MAX_RESULTS)
    pub search_max_results: usize,
    /// Catalog page size (SEARCH_PAGE_SIZE)
    pub search_page_size: usize,
    /// Refresh interval override in seconds (REFRESH_INTERVAL_SECS)
    pub refresh_interval_secs: u64,
    /// Max attempts per page request (FETCH_MAX_ATTEMPTS). Capped by the
    /// backoff schedule length + 1.
    pub fetch_max_attempts: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            marketplace_api_url: std::env::var("MARKETPLACE_API_URL")
                .unwrap_or_else(|_| MARKETPLACE_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            search_text: std::env::var("SEARCH_TEXT").unwrap_or_else(|_| "".to_string()),
            search_category: std::env::var("SEARCH_CATEGORY").ok().filter(|s| !s.is_empty()),
            search_min_price: parse_opt_f64("SEARCH_MIN_PRICE")?,
            search_max_price: parse_opt_f64("SEARCH_MAX_PRICE")?,
            search_max_results: std::env::var("SEARCH_MAX_RESULTS")
                .unwrap_or_else(|_| "500".to_string())
                .parse::<usize>()
                .unwrap_or(500),
            search_page_size: std::env::var("SEARCH_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<usize>()
                .unwrap_or(100),
            refresh_interval_secs: std::env::var("REFRESH_INTERVAL_SECS")
                .unwrap_or_else(|_| REFRESH_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(REFRESH_INTERVAL_SECS),
            fetch_max_attempts: std::env::var("FETCH_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse::<usize>()
                .unwrap_or(3)
                .min(FETCH_BACKOFF_MS.len() + 1),
        })
    }
}

fn parse_opt_f64(var: &str) -> Result<Option<f64>> {
    match std::env::var(var) {
        Ok(s) if !s.is_empty() => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{var} must be a number"))),
        _ => Ok(None),
    }
}
