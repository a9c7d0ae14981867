use std::collections::{HashMap, HashSet};

use crate::types::Listing;

/// Outcome of submitting one normalized listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First observation of this id.
    New,
    /// Known id, at least one mutable field changed — merged.
    Updated,
    /// Known id, identical observation — nothing touched.
    Unchanged,
}

/// Tracks every listing ever observed in this session, keyed by the stable
/// marketplace id. Owned by the refresh pipeline; never shared with readers,
/// so a plain HashMap suffices. Guarantees at most one Listing per id ever
/// reaches the ranking store.
#[derive(Debug, Default)]
pub struct Deduplicator {
    by_id: HashMap<String, Listing>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation. First-seen wins for `seen_at_ns` and
    /// `posted_at`; mutable fields (price, condition, counts, payload) are
    /// merged on repeat observations. Submitting an identical record twice
    /// is idempotent — the stored entry is not touched at all.
    pub fn submit(&mut self, incoming: Listing) -> SubmitOutcome {
        match self.by_id.get_mut(&incoming.id) {
            None => {
                self.by_id.insert(incoming.id.clone(), incoming);
                SubmitOutcome::New
            }
            Some(existing) => {
                if observation_eq(existing, &incoming) {
                    return SubmitOutcome::Unchanged;
                }
                existing.title = incoming.title;
                existing.description = incoming.description;
                existing.price = incoming.price;
                existing.currency = incoming.currency;
                existing.category = incoming.category;
                existing.brand = incoming.brand;
                existing.condition = incoming.condition;
                existing.favorites = incoming.favorites;
                existing.views = incoming.views;
                existing.url = incoming.url;
                existing.item_count = incoming.item_count;
                existing.last_seen_ns = incoming.last_seen_ns;
                existing.stale = false;
                existing.raw = incoming.raw;
                if existing.posted_at.is_none() {
                    existing.posted_at = incoming.posted_at;
                }
                SubmitOutcome::Updated
            }
        }
    }

    /// Flag every tracked id missing from the latest fetch as stale.
    /// Stale listings are retained for historical reference, never deleted.
    /// Returns how many flipped to stale this call.
    pub fn mark_stale(&mut self, fresh_ids: &HashSet<String>) -> usize {
        let mut marked = 0;
        for (id, listing) in self.by_id.iter_mut() {
            if !fresh_ids.contains(id) && !listing.stale {
                listing.stale = true;
                marked += 1;
            }
        }
        marked
    }

    /// Current view of every tracked listing, cloned for the scoring stage.
    pub fn listings(&self) -> Vec<Listing> {
        self.by_id.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&Listing> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn stale_count(&self) -> usize {
        self.by_id.values().filter(|l| l.stale).count()
    }
}

/// Field-wise comparison of the observable content of two observations of
/// the same id. Timestamps of observation (seen_at/last_seen) are excluded —
/// they differ between polls even when the record itself did not change.
fn observation_eq(a: &Listing, b: &Listing) -> bool {
    a.title == b.title
        && a.description == b.description
        && a.price == b.price
        && a.currency == b.currency
        && a.category == b.category
        && a.brand == b.brand
        && a.condition == b.condition
        && a.favorites == b.favorites
        && a.views == b.views
        && a.url == b.url
        && a.item_count == b.item_count
        && !a.stale
        && a.raw == b.raw
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing(id: &str, price: f64, seen_at_ns: u64) -> Listing {
        Listing {
            id: id.to_string(),
            title: "Test item".to_string(),
            description: String::new(),
            price,
            currency: Some("EUR".to_string()),
            category: Some("coats".to_string()),
            brand: Some("Acme".to_string()),
            condition: None,
            posted_at: Some(1_700_000_000),
            favorites: 0,
            views: 0,
            url: None,
            item_count: 1,
            seen_at_ns,
            last_seen_ns: seen_at_ns,
            stale: false,
            raw: json!({"id": id, "price": price}),
        }
    }

    #[test]
    fn first_observation_is_new() {
        let mut dedup = Deduplicator::new();
        assert_eq!(dedup.submit(listing("a", 20.0, 1)), SubmitOutcome::New);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn price_drop_merges_and_preserves_first_seen() {
        let mut dedup = Deduplicator::new();
        dedup.submit(listing("a", 20.0, 1));
        assert_eq!(dedup.submit(listing("a", 18.0, 2)), SubmitOutcome::Updated);

        let stored = dedup.get("a").unwrap();
        assert!((stored.price - 18.0).abs() < 1e-9);
        assert_eq!(stored.seen_at_ns, 1, "first-seen wins");
        assert_eq!(stored.last_seen_ns, 2);
        assert_eq!(dedup.len(), 1, "no second entry for the same id");
    }

    #[test]
    fn identical_resubmission_is_idempotent() {
        let mut dedup = Deduplicator::new();
        dedup.submit(listing("a", 20.0, 1));
        let before = dedup.get("a").unwrap().clone();

        assert_eq!(dedup.submit(listing("a", 20.0, 5)), SubmitOutcome::Unchanged);
        assert_eq!(dedup.get("a").unwrap(), &before, "stored entry untouched");
    }

    #[test]
    fn reappearing_listing_clears_stale() {
        let mut dedup = Deduplicator::new();
        dedup.submit(listing("a", 20.0, 1));

        let fresh: HashSet<String> = HashSet::new();
        assert_eq!(dedup.mark_stale(&fresh), 1);
        assert!(dedup.get("a").unwrap().stale);
        assert_eq!(dedup.stale_count(), 1);

        // Marketplace returns the id again — the merge clears the flag.
        assert_eq!(dedup.submit(listing("a", 20.0, 9)), SubmitOutcome::Updated);
        assert!(!dedup.get("a").unwrap().stale);
    }

    #[test]
    fn mark_stale_retains_listings() {
        let mut dedup = Deduplicator::new();
        dedup.submit(listing("a", 20.0, 1));
        dedup.submit(listing("b", 30.0, 1));

        let fresh: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert_eq!(dedup.mark_stale(&fresh), 1);
        assert_eq!(dedup.len(), 2, "stale listings are never deleted");
        assert!(dedup.get("a").unwrap().stale);
        assert!(!dedup.get("b").unwrap().stale);

        // Already-stale ids are not counted again.
        assert_eq!(dedup.mark_stale(&fresh), 0);
    }
}
