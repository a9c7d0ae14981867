use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::Config;
use crate::dedup::{Deduplicator, SubmitOutcome};
use crate::error::Result;
use crate::fetcher::{build_client, fetch_listings, ListingQuery};
use crate::normalizer::{normalize, NormalizeStats};
use crate::scorer::{score, ScoreContext, ScoringModel};
use crate::state::RankingStore;
use crate::types::{CycleStats, RefreshRequest};

/// Every Nth cycle ignores the watermark and re-fetches the full result set.
/// Incremental cycles only surface records newer than the watermark, so they
/// cannot tell which tracked listings disappeared — staleness is only
/// decided on full cycles.
const FULL_REFRESH_EVERY: u64 = 6;

/// Runs the refresh state machine:
/// Idle → Fetching → Normalizing → Deduplicating → Scoring → Publishing → Idle.
///
/// Owns the deduplicator and the watermark; the ranking store and health
/// state are the only shared surfaces. A fetch failure aborts the cycle and
/// leaves the previous snapshot (and the watermark) untouched.
pub struct RefreshPipeline {
    cfg: Config,
    query: ListingQuery,
    client: reqwest::Client,
    model: ScoringModel,
    dedup: Deduplicator,
    /// Max posted_at seen on a successful cycle; incremental fetches cut
    /// records at or below it.
    watermark: Option<u64>,
    cycles_run: u64,
    store: Arc<RankingStore>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl RefreshPipeline {
    pub fn new(
        cfg: Config,
        model: ScoringModel,
        store: Arc<RankingStore>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Result<Self> {
        model.validate()?;
        let query = ListingQuery::from_config(&cfg);
        let client = build_client()?;
        Ok(Self {
            cfg,
            query,
            client,
            model,
            dedup: Deduplicator::new(),
            watermark: None,
            cycles_run: 0,
            store,
            health,
            latency,
        })
    }

    /// One full refresh cycle. Errors abort before the publish stage.
    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        let started = Instant::now();
        let full = self.cycles_run % FULL_REFRESH_EVERY == 0;
        self.cycles_run += 1;

        let watermark = if full { None } else { self.watermark };
        let fetch_result = fetch_listings(&self.client, &self.cfg, &self.query, watermark).await;

        let (raw, fetch_stats) = match fetch_result {
            Ok(r) => r,
            Err(e) => {
                self.health.record_failure(e.to_string());
                return Err(e);
            }
        };

        let stats = self.ingest(raw, full);
        self.latency.record(started.elapsed());

        info!(
            full,
            fetched = stats.fetched,
            pages = fetch_stats.pages_fetched,
            cut_by_watermark = fetch_stats.cut_by_watermark,
            new = stats.new_listings,
            updated = stats.updated_listings,
            dropped = stats.dropped,
            marked_stale = stats.marked_stale,
            published = stats.published,
            "refresh cycle complete: +{} new, {} updated, {} dropped, {} total ranked",
            stats.new_listings, stats.updated_listings, stats.dropped, stats.published,
        );

        Ok(stats)
    }

    /// Normalize → deduplicate → score → publish, from already-fetched raw
    /// records. Split out of `run_cycle` so the CPU-bound stages are
    /// exercisable without network I/O.
    pub fn ingest(&mut self, raw: Vec<Value>, full: bool) -> CycleStats {
        let seen_at_ns = now_ns();
        let mut stats = CycleStats {
            fetched: raw.len(),
            ..CycleStats::default()
        };

        // Normalizing + Deduplicating
        let mut nstats = NormalizeStats::default();
        let mut fresh_ids: HashSet<String> = HashSet::new();
        let mut max_posted = self.watermark.unwrap_or(0);

        for record in &raw {
            match normalize(record, seen_at_ns) {
                Ok(listing) => {
                    nstats.accepted += 1;
                    fresh_ids.insert(listing.id.clone());
                    if let Some(posted) = listing.posted_at {
                        max_posted = max_posted.max(posted);
                    }
                    match self.dedup.submit(listing) {
                        SubmitOutcome::New => stats.new_listings += 1,
                        SubmitOutcome::Updated => stats.updated_listings += 1,
                        SubmitOutcome::Unchanged => stats.unchanged_listings += 1,
                    }
                }
                Err(reject) => nstats.record(&reject),
            }
        }
        stats.normalized = nstats.accepted;
        stats.dropped = nstats.rejected();

        if nstats.rejected() > 0 {
            warn!(
                missing_id = nstats.rejected_missing_id,
                bad_price = nstats.rejected_bad_price,
                negative_price = nstats.rejected_negative_price,
                unknown_shape = nstats.rejected_unknown_shape,
                "normalizer dropped {} of {} records",
                nstats.rejected(),
                raw.len(),
            );
            for sample in &nstats.shape_samples {
                warn!("unrecognized record shape: {sample}");
            }
        }

        if full {
            stats.marked_stale = self.dedup.mark_stale(&fresh_ids);
        }

        // Scoring — deterministic given the model and the per-cycle context.
        let listings = self.dedup.listings();
        let ctx = ScoreContext::build(&listings, seen_at_ns / 1_000_000_000);
        let scored: Vec<_> = listings
            .iter()
            .map(|l| score(l, &self.model, &ctx))
            .collect();
        stats.published = scored.len();

        // Publishing — atomic snapshot replacement.
        self.store.publish(scored, seen_at_ns);
        self.watermark = if max_posted > 0 { Some(max_posted) } else { None };
        self.health.record_success(
            seen_at_ns,
            self.dedup.len() as u64,
            self.dedup.stale_count() as u64,
            stats.dropped as u64,
        );

        stats
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }
}

// ---------------------------------------------------------------------------
// RefreshScheduler
// ---------------------------------------------------------------------------

/// Drives the pipeline: a timer tick or a manual trigger starts a cycle,
/// never two at once — the scheduler is a single task and runs cycles
/// inline. Triggers that arrive while a cycle is in flight are drained
/// afterwards (coalesced), not queued.
pub struct RefreshScheduler {
    pipeline: RefreshPipeline,
    interval_secs: u64,
    refresh_rx: mpsc::Receiver<RefreshRequest>,
}

impl RefreshScheduler {
    pub fn new(
        pipeline: RefreshPipeline,
        interval_secs: u64,
        refresh_rx: mpsc::Receiver<RefreshRequest>,
    ) -> Self {
        Self {
            pipeline,
            interval_secs,
            refresh_rx,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.tick().await; // skip immediate first tick — bootstrap already ran

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(RefreshRequest) = self.refresh_rx.recv() => {
                    info!("manual refresh requested");
                }
            }

            if let Err(e) = self.pipeline.run_cycle().await {
                error!("Refresh cycle failed, keeping previous snapshot: {e}");
            }

            // Coalesce triggers that piled up while the cycle was running.
            while self.refresh_rx.try_recv().is_ok() {}
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
