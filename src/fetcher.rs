use std::time::Duration;

use futures_util::{stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, FETCH_BACKOFF_MS, FETCH_CONCURRENCY, FETCH_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::normalizer::extract_posted_at;

/// Marketplace search parameters for one refresh cycle.
#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub search_text: String,
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub max_results: usize,
    pub page_size: usize,
}

impl ListingQuery {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            search_text: cfg.search_text.clone(),
            category: cfg.search_category.clone(),
            min_price: cfg.search_min_price,
            max_price: cfg.search_max_price,
            max_results: cfg.search_max_results,
            page_size: cfg.search_page_size.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchStats {
    pub pages_fetched: usize,
    pub records_returned: usize,
    /// Records at or below the incremental watermark, cut before normalize.
    pub cut_by_watermark: usize,
    pub retries: usize,
}

pub fn build_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()?)
}

/// Fetch raw listing records from the marketplace catalog, newest first.
///
/// Pages until the result limit or the last page. Records whose posting
/// timestamp is at or below `watermark` are cut off — on repeated polls only
/// listings newer than the last successful cycle survive, which bounds cost.
/// Records without a timestamp always pass the cutoff; the deduplicator
/// handles the repeats.
///
/// Page requests retry on the backoff schedule; exhaustion fails the cycle
/// with `AppError::Fetch`. No shared state is touched — network I/O only.
pub async fn fetch_listings(
    client: &reqwest::Client,
    cfg: &Config,
    query: &ListingQuery,
    watermark: Option<u64>,
) -> Result<(Vec<Value>, FetchStats)> {
    let mut stats = FetchStats::default();

    let first_url = build_page_url(cfg, query, 1);
    let (first_page, retries) = get_page_with_retry(client, &first_url, cfg.fetch_max_attempts).await?;
    stats.retries += retries;
    stats.pages_fetched += 1;

    let mut records = page_items(&first_page)?;

    let total_pages = first_page
        .get("pagination")
        .and_then(|p| p.get("total_pages"))
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;
    let pages_needed = total_pages.min(query.max_results.div_ceil(query.page_size));

    if pages_needed > 1 {
        // Remaining pages in parallel, bounded and order-preserving.
        let urls: Vec<String> = (2..=pages_needed)
            .map(|page| build_page_url(cfg, query, page))
            .collect();

        let pages: Vec<Result<(Value, usize)>> = stream::iter(urls)
            .map(|url| async move {
                get_page_with_retry(client, &url, cfg.fetch_max_attempts).await
            })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        for page in pages {
            let (body, retries) = page?;
            stats.retries += retries;
            stats.pages_fetched += 1;
            records.extend(page_items(&body)?);
        }
    }

    records.truncate(query.max_results);

    if let Some(mark) = watermark {
        let before = records.len();
        records.retain(|r| record_posted_at(r).map_or(true, |ts| ts > mark));
        stats.cut_by_watermark = before - records.len();
    }
    stats.records_returned = records.len();

    debug!(
        pages = stats.pages_fetched,
        records = stats.records_returned,
        cut = stats.cut_by_watermark,
        retries = stats.retries,
        "catalog fetch complete",
    );

    Ok((records, stats))
}

fn build_page_url(cfg: &Config, query: &ListingQuery, page: usize) -> String {
    let mut url = format!(
        "{}/catalog/items?search_text={}&page={}&per_page={}&order=newest_first",
        cfg.marketplace_api_url, query.search_text, page, query.page_size,
    );
    if let Some(category) = &query.category {
        url.push_str(&format!("&category={category}"));
    }
    if let Some(min) = query.min_price {
        url.push_str(&format!("&price_from={min}"));
    }
    if let Some(max) = query.max_price {
        url.push_str(&format!("&price_to={max}"));
    }
    url
}

fn page_items(body: &Value) -> Result<Vec<Value>> {
    match body.get("items").and_then(Value::as_array) {
        Some(items) => Ok(items.clone()),
        None => Err(AppError::Fetch(
            "catalog response did not contain an items array".to_string(),
        )),
    }
}

/// Posting timestamp of a raw record, looking through promoted wrappers.
fn record_posted_at(v: &Value) -> Option<u64> {
    extract_posted_at(v).or_else(|| v.get("item").and_then(extract_posted_at))
}

/// One page request with bounded retries. Returns the body and how many
/// retries it took. Rate-limit and transient network failures land on the
/// same backoff path.
async fn get_page_with_retry(
    client: &reqwest::Client,
    url: &str,
    max_attempts: usize,
) -> Result<(Value, usize)> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = match client.get(url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<Value>().await {
                    Ok(body) => return Ok((body, attempt)),
                    Err(e) => format!("body decode failed: {e}"),
                },
                Err(e) => format!("status: {e}"),
            },
            Err(e) => format!("request failed: {e}"),
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(AppError::Fetch(format!(
                "giving up after {attempt} attempts: {outcome}"
            )));
        }
        let backoff = FETCH_BACKOFF_MS[(attempt - 1).min(FETCH_BACKOFF_MS.len() - 1)];
        warn!(attempt, backoff_ms = backoff, "page fetch failed, retrying: {outcome}");
        tokio::time::sleep(Duration::from_millis(backoff)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> Config {
        Config {
            marketplace_api_url: "http://localhost:1".to_string(),
            log_level: "info".to_string(),
            api_port: 3000,
            search_text: "denim".to_string(),
            search_category: None,
            search_min_price: None,
            search_max_price: None,
            search_max_results: 500,
            search_page_size: 100,
            refresh_interval_secs: 300,
            fetch_max_attempts: 1,
        }
    }

    #[test]
    fn page_url_carries_query_params() {
        let cfg = test_config();
        let query = ListingQuery {
            search_text: "denim".to_string(),
            category: Some("jackets".to_string()),
            min_price: Some(5.0),
            max_price: Some(50.0),
            max_results: 500,
            page_size: 100,
        };

        let url = build_page_url(&cfg, &query, 3);
        assert!(url.starts_with("http://localhost:1/catalog/items?search_text=denim"));
        assert!(url.contains("page=3"));
        assert!(url.contains("per_page=100"));
        assert!(url.contains("category=jackets"));
        assert!(url.contains("price_from=5"));
        assert!(url.contains("price_to=50"));
        assert!(url.contains("order=newest_first"));
    }

    #[test]
    fn optional_params_are_omitted_when_unset() {
        let cfg = test_config();
        let query = ListingQuery::from_config(&cfg);
        let url = build_page_url(&cfg, &query, 1);
        assert!(!url.contains("category="));
        assert!(!url.contains("price_from="));
        assert!(!url.contains("price_to="));
    }

    #[test]
    fn page_items_rejects_missing_array() {
        assert!(page_items(&json!({"items": [{"id": 1}]})).is_ok());
        assert!(page_items(&json!({"error": "rate limited"})).is_err());
    }

    #[test]
    fn record_posted_at_sees_through_promoted_wrapper() {
        let flat = json!({"id": 1, "created_at_ts": 500});
        assert_eq!(record_posted_at(&flat), Some(500));

        let wrapped = json!({"promoted": true, "item": {"id": 2, "created_at_ts": 700}});
        assert_eq!(record_posted_at(&wrapped), Some(700));

        let bare = json!({"id": 3});
        assert_eq!(record_posted_at(&bare), None);
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_attempts() {
        let client = build_client().unwrap();
        let err = get_page_with_retry(&client, "http://127.0.0.1:9/catalog/items", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));
    }
}
