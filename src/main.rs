mod api;
mod config;
mod dedup;
mod error;
mod fetcher;
mod normalizer;
mod refresh;
mod scorer;
mod state;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::error::Result;
use crate::refresh::{RefreshPipeline, RefreshScheduler};
use crate::scorer::ScoringModel;
use crate::state::RankingStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Scoring model: validated up front so a bad config never reaches
    // the first cycle ---
    let model = ScoringModel::from_env()?;
    info!(
        factors = %model
            .factors
            .iter()
            .map(|f| format!("{}={}", f.name(), f.weight()))
            .collect::<Vec<_>>()
            .join(","),
        "Scoring model loaded",
    );

    // --- Shared state ---
    let store = RankingStore::new();
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    let mut pipeline = RefreshPipeline::new(
        cfg.clone(),
        model,
        Arc::clone(&store),
        Arc::clone(&health),
        Arc::clone(&latency),
    )?;

    // --- Bootstrap: one full cycle before serving, so the dashboard never
    // sees an empty ranking unless the very first fetch fails ---
    match pipeline.run_cycle().await {
        Ok(stats) => info!(
            "Bootstrap complete: {} listings ranked ({} fetched, {} dropped)",
            stats.published, stats.fetched, stats.dropped,
        ),
        Err(e) => error!("Bootstrap cycle failed, serving empty ranking until retry: {e}"),
    }

    // --- Channels ---
    let (refresh_tx, refresh_rx) = mpsc::channel(CHANNEL_CAPACITY);

    // --- Refresh scheduler (background, single cycle in flight) ---
    let scheduler = RefreshScheduler::new(pipeline, cfg.refresh_interval_secs, refresh_rx);
    tokio::spawn(async move { scheduler.run().await });

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        health,
        latency,
        refresh_tx,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
