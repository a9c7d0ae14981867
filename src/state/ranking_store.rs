use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::types::{ExportRow, RankingSnapshot, ScoredListing};

/// Holds the current ranked view of all scored listings.
///
/// Publishing replaces an immutable snapshot behind a pointer swap — readers
/// see either the old or the new snapshot in full, never a partial mix. The
/// write lock is held only for the swap itself, so `current()` never blocks
/// on an in-progress refresh.
pub struct RankingStore {
    snapshot: RwLock<Arc<RankingSnapshot>>,
    /// id → scored listing, for point lookups by the API.
    by_id: DashMap<String, ScoredListing>,
}

impl RankingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(Arc::new(RankingSnapshot::empty())),
            by_id: DashMap::new(),
        })
    }

    /// Sort and atomically publish a new snapshot. Returns the published Arc.
    pub fn publish(
        &self,
        mut listings: Vec<ScoredListing>,
        published_at_ns: u64,
    ) -> Arc<RankingSnapshot> {
        listings.sort_by(ranking_order);

        for scored in &listings {
            self.by_id.insert(scored.listing.id.clone(), scored.clone());
        }

        let next = Arc::new(RankingSnapshot {
            listings,
            published_at_ns,
            sequence: self.current().sequence + 1,
        });

        let mut guard = match self.snapshot.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&next);
        next
    }

    /// The latest published snapshot. Non-blocking; cheap Arc clone.
    pub fn current(&self) -> Arc<RankingSnapshot> {
        match self.snapshot.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn get(&self, id: &str) -> Option<ScoredListing> {
        self.by_id.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.current().listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().listings.is_empty()
    }

    /// Flat tabular view of the current snapshot, ranking order preserved.
    pub fn export_rows(&self) -> Vec<ExportRow> {
        self.current()
            .listings
            .iter()
            .map(|s| ExportRow {
                id: s.listing.id.clone(),
                title: s.listing.title.clone(),
                price: s.listing.price,
                score: s.score,
                stale: s.listing.stale,
                score_breakdown: s.score_breakdown.clone(),
            })
            .collect()
    }
}

/// Descending score, then ascending first-seen, then ascending id.
/// `total_cmp` gives a total order over f64 so the sort is deterministic.
fn ranking_order(a: &ScoredListing, b: &ScoredListing) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.listing.seen_at_ns.cmp(&b.listing.seen_at_ns))
        .then_with(|| a.listing.id.cmp(&b.listing.id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Listing;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn scored(id: &str, score: f64, seen_at_ns: u64) -> ScoredListing {
        ScoredListing {
            listing: Listing {
                id: id.to_string(),
                title: format!("item {id}"),
                description: String::new(),
                price: 10.0,
                currency: None,
                category: None,
                brand: None,
                condition: None,
                posted_at: None,
                favorites: 0,
                views: 0,
                url: None,
                item_count: 1,
                seen_at_ns,
                last_seen_ns: seen_at_ns,
                stale: false,
                raw: json!({}),
            },
            score,
            score_breakdown: BTreeMap::new(),
        }
    }

    #[test]
    fn snapshot_is_sorted_descending_by_score() {
        let store = RankingStore::new();
        store.publish(
            vec![scored("a", 1.0, 1), scored("b", 3.0, 1), scored("c", 2.0, 1)],
            100,
        );

        let snap = store.current();
        let scores: Vec<f64> = snap.listings.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![3.0, 2.0, 1.0]);
        for pair in snap.listings.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn score_ties_break_by_earliest_seen_then_id() {
        let store = RankingStore::new();
        store.publish(
            vec![
                scored("late", 10.0, 200),
                scored("early", 10.0, 100),
                scored("b", 10.0, 200),
            ],
            100,
        );

        let snap = store.current();
        let ids: Vec<&str> = snap.listings.iter().map(|s| s.listing.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "b", "late"]);
    }

    #[test]
    fn publish_replaces_snapshot_atomically() {
        let store = RankingStore::new();
        store.publish(vec![scored("a", 1.0, 1)], 100);

        let old = store.current();
        assert_eq!(old.sequence, 1);

        store.publish(vec![scored("a", 1.0, 1), scored("b", 2.0, 2)], 200);
        let new = store.current();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.sequence, 2);
        assert_eq!(new.published_at_ns, 200);
        // A reader holding the old Arc still sees the old view in full.
        assert_eq!(old.listings.len(), 1);
        assert_eq!(new.listings.len(), 2);
    }

    #[test]
    fn empty_store_serves_an_empty_snapshot() {
        let store = RankingStore::new();
        let snap = store.current();
        assert_eq!(snap.sequence, 0);
        assert!(snap.listings.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn point_lookup_finds_published_listing() {
        let store = RankingStore::new();
        store.publish(vec![scored("a", 1.5, 1)], 100);

        let hit = store.get("a").unwrap();
        assert!((hit.score - 1.5).abs() < 1e-9);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn export_rows_preserve_ranking_order() {
        let store = RankingStore::new();
        store.publish(vec![scored("low", 1.0, 1), scored("high", 2.0, 1)], 100);

        let rows = store.export_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "high");
        assert_eq!(rows[1].id, "low");
    }
}
