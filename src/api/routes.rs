use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::SNAPSHOT_STALE_AFTER_SECS;
use crate::state::RankingStore;
use crate::types::{RefreshRequest, ScoredListing};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<RankingStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub refresh_tx: mpsc::Sender<RefreshRequest>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/rankings", get(get_rankings))
        .route("/rankings/export", get(get_export))
        .route("/listings/:id", get(get_listing))
        .route("/status", get(get_status))
        .route("/health", get(get_health))
        .route("/refresh", post(post_refresh))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RankingsQuery {
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    pub category: Option<String>,
    /// Stale listings are excluded unless explicitly requested.
    pub include_stale: Option<bool>,
}

#[derive(Deserialize)]
pub struct ExportQuery {
    /// "json" (default) or "csv".
    pub format: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// One ranked listing, flattened for the dashboard — the raw payload is
/// available via /listings/:id, not here.
#[derive(Serialize)]
pub struct RankedListingResponse {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub condition: Option<String>,
    pub url: Option<String>,
    pub stale: bool,
    pub seen_at_ns: u64,
    pub score: f64,
    pub score_breakdown: BTreeMap<String, f64>,
}

impl From<&ScoredListing> for RankedListingResponse {
    fn from(s: &ScoredListing) -> Self {
        Self {
            id: s.listing.id.clone(),
            title: s.listing.title.clone(),
            price: s.listing.price,
            currency: s.listing.currency.clone(),
            category: s.listing.category.clone(),
            brand: s.listing.brand.clone(),
            condition: s.listing.condition.map(|c| c.to_string()),
            url: s.listing.url.clone(),
            stale: s.listing.stale,
            seen_at_ns: s.listing.seen_at_ns,
            score: s.score,
            score_breakdown: s.score_breakdown.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct RankingsResponse {
    pub sequence: u64,
    pub published_at_ns: u64,
    pub total: usize,
    pub listings: Vec<RankedListingResponse>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub snapshot_sequence: u64,
    pub snapshot_age_secs: Option<u64>,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
    pub last_error: Option<String>,
    pub listings_total: u64,
    pub listings_stale: u64,
    pub dropped_last_cycle: u64,
    pub cycle_p50_ms: Option<f64>,
    pub cycle_p95_ms: Option<f64>,
    pub cycle_p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_rankings(
    State(state): State<ApiState>,
    Query(params): Query<RankingsQuery>,
) -> Json<RankingsResponse> {
    let snapshot = state.store.current();
    let include_stale = params.include_stale.unwrap_or(false);
    let min_score = params.min_score.unwrap_or(f64::NEG_INFINITY);
    let limit = params.limit.unwrap_or(100);

    let listings: Vec<RankedListingResponse> = snapshot
        .listings
        .iter()
        .filter(|s| include_stale || !s.listing.stale)
        .filter(|s| s.score >= min_score)
        .filter(|s| {
            params.category.as_ref().map_or(true, |c| {
                s.listing.category.as_deref() == Some(c.as_str())
            })
        })
        .take(limit)
        .map(RankedListingResponse::from)
        .collect();

    Json(RankingsResponse {
        sequence: snapshot.sequence,
        published_at_ns: snapshot.published_at_ns,
        total: snapshot.listings.len(),
        listings,
    })
}

async fn get_export(
    State(state): State<ApiState>,
    Query(params): Query<ExportQuery>,
) -> axum::response::Response {
    let rows = state.store.export_rows();

    match params.format.as_deref() {
        Some("csv") => {
            let mut out = String::from("id,title,price,score,stale,score_breakdown\n");
            for row in &rows {
                let breakdown =
                    serde_json::to_string(&row.score_breakdown).unwrap_or_else(|_| "{}".to_string());
                out.push_str(&format!(
                    "{},{},{},{},{},{}\n",
                    csv_escape(&row.id),
                    csv_escape(&row.title),
                    row.price,
                    row.score,
                    row.stale,
                    csv_escape(&breakdown),
                ));
            }
            ([(header::CONTENT_TYPE, "text/csv")], out).into_response()
        }
        _ => Json(rows).into_response(),
    }
}

async fn get_listing(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match state.store.get(&id) {
        Some(scored) => Json(scored).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown listing id: {id}")).into_response(),
    }
}

async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.store.current();
    let (p50, p95, p99) = state.latency.percentiles();

    Json(StatusResponse {
        snapshot_sequence: snapshot.sequence,
        snapshot_age_secs: snapshot_age_secs(&state.health),
        cycles_ok: state.health.cycles_ok.load(std::sync::atomic::Ordering::Relaxed),
        cycles_failed: state.health.cycles_failed.load(std::sync::atomic::Ordering::Relaxed),
        last_error: state.health.last_error(),
        listings_total: state.health.listings_total.load(std::sync::atomic::Ordering::Relaxed),
        listings_stale: state.health.listings_stale.load(std::sync::atomic::Ordering::Relaxed),
        dropped_last_cycle: state
            .health
            .dropped_last_cycle
            .load(std::sync::atomic::Ordering::Relaxed),
        cycle_p50_ms: p50.map(us_to_ms),
        cycle_p95_ms: p95.map(us_to_ms),
        cycle_p99_ms: p99.map(us_to_ms),
    })
}

/// Liveness: 200 while a reasonably fresh snapshot exists, 503 otherwise.
/// A stale-but-valid snapshot keeps serving on /rankings either way.
async fn get_health(State(state): State<ApiState>) -> axum::response::Response {
    match snapshot_age_secs(&state.health) {
        Some(age) if age <= SNAPSHOT_STALE_AFTER_SECS => {
            (StatusCode::OK, "ok").into_response()
        }
        Some(age) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("snapshot is {age}s old"),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no snapshot published yet").into_response(),
    }
}

/// Manual refresh trigger. Requests landing while a cycle is in flight are
/// coalesced by the scheduler; a full channel means one is already pending.
async fn post_refresh(State(state): State<ApiState>) -> StatusCode {
    let _ = state.refresh_tx.try_send(RefreshRequest);
    StatusCode::ACCEPTED
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn snapshot_age_secs(health: &HealthState) -> Option<u64> {
    let published = health.last_published_at_ns();
    if published == 0 {
        return None;
    }
    Some(now_ns().saturating_sub(published) / 1_000_000_000)
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1_000.0
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
