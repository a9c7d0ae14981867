use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// A single marketplace item observation, canonical across raw shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Stable marketplace identifier — the dedup key across refresh cycles.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Asking price in the marketplace currency. Never negative.
    pub price: f64,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub condition: Option<Condition>,
    /// Unix seconds the seller posted the listing, when the payload carries it.
    pub posted_at: Option<u64>,
    pub favorites: u32,
    pub views: u32,
    pub url: Option<String>,
    /// Number of items when the listing is a bundle lot (1 otherwise).
    pub item_count: u32,
    /// Nanosecond UTC epoch of first observation. Preserved across merges.
    pub seen_at_ns: u64,
    /// Nanosecond UTC epoch of the most recent observation.
    pub last_seen_ns: u64,
    /// Set when the marketplace stopped returning the id; retained for history.
    pub stale: bool,
    /// Original payload, kept for audit/debug.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    NewWithTags,
    New,
    VeryGood,
    Good,
    Satisfactory,
}

impl Condition {
    /// Map the marketplace's free-text condition labels. Unrecognized → None.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "new with tags" | "new_with_tags" | "brand new with tags" => {
                Some(Condition::NewWithTags)
            }
            "new" | "new without tags" | "new_without_tags" => Some(Condition::New),
            "very good" | "very_good" => Some(Condition::VeryGood),
            "good" => Some(Condition::Good),
            "satisfactory" | "fair" => Some(Condition::Satisfactory),
            _ => None,
        }
    }

    /// Resale desirability of the condition on a 0..1 scale.
    pub fn rank(self) -> f64 {
        match self {
            Condition::NewWithTags => 1.0,
            Condition::New => 0.85,
            Condition::VeryGood => 0.65,
            Condition::Good => 0.45,
            Condition::Satisfactory => 0.2,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Condition::NewWithTags => "new_with_tags",
            Condition::New => "new",
            Condition::VeryGood => "very_good",
            Condition::Good => "good",
            Condition::Satisfactory => "satisfactory",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// ScoredListing
// ---------------------------------------------------------------------------

/// Listing plus its desirability score. One-to-one with Listing; recomputed
/// every cycle from the same deterministic model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredListing {
    pub listing: Listing,
    /// Weighted sum of factor contributions. Always finite.
    pub score: f64,
    /// Factor name → contribution. Factors with missing inputs appear as 0.0.
    pub score_breakdown: BTreeMap<String, f64>,
}

/// Flat record for tabular export (display or download).
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub score: f64,
    pub stale: bool,
    pub score_breakdown: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// RankingSnapshot
// ---------------------------------------------------------------------------

/// Immutable, fully ordered view of all current scored listings.
/// Published atomically by the ranking store; read-only to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct RankingSnapshot {
    /// Descending score; ties broken by ascending seen_at_ns, then id.
    pub listings: Vec<ScoredListing>,
    /// Nanosecond UTC epoch of the publish.
    pub published_at_ns: u64,
    /// Monotonic cycle counter, 0 before the first publish.
    pub sequence: u64,
}

impl RankingSnapshot {
    pub fn empty() -> Self {
        Self {
            listings: Vec::new(),
            published_at_ns: 0,
            sequence: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Refresh cycle messages
// ---------------------------------------------------------------------------

/// Manual refresh request, sent from the API to the scheduler. Requests
/// arriving while a cycle is in flight are coalesced, never queued.
#[derive(Debug, Clone, Copy)]
pub struct RefreshRequest;

/// Per-cycle outcome summary, logged and surfaced on /status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub fetched: usize,
    pub normalized: usize,
    pub dropped: usize,
    pub new_listings: usize,
    pub updated_listings: usize,
    pub unchanged_listings: usize,
    pub marked_stale: usize,
    pub published: usize,
}
