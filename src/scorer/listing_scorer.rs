use std::collections::BTreeMap;

use crate::scorer::model::{Factor, ScoringModel};
use crate::types::{Listing, ScoredListing};

/// Posting freshness decays to zero over one week.
const RECENCY_HORIZON_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Per-cycle inputs shared by every scoring call. Fixing the clock and the
/// median table per cycle keeps scoring deterministic within the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreContext {
    /// category → median observed price across the tracked set.
    category_median: BTreeMap<String, f64>,
    /// Unix seconds at cycle start, used by the recency factor.
    now_secs: u64,
}

impl ScoreContext {
    pub fn build(listings: &[Listing], now_secs: u64) -> Self {
        let mut by_category: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for listing in listings {
            if let Some(cat) = &listing.category {
                by_category.entry(cat.clone()).or_default().push(listing.price);
            }
        }

        let category_median = by_category
            .into_iter()
            .filter_map(|(cat, prices)| median(&prices).map(|m| (cat, m)))
            .collect();

        Self { category_median, now_secs }
    }

    pub fn median_for(&self, category: &str) -> Option<f64> {
        self.category_median.get(category).copied()
    }
}

/// Score one listing against the model. Pure: same listing + model + context
/// always yields bit-identical output. Missing attributes contribute exactly
/// 0.0 to their factor and still appear in the breakdown.
pub fn score(listing: &Listing, model: &ScoringModel, ctx: &ScoreContext) -> ScoredListing {
    let mut breakdown = BTreeMap::new();
    for factor in &model.factors {
        let sub = evaluate(factor, listing, ctx);
        breakdown.insert(factor.name().to_string(), factor.weight() * sub);
    }
    let score: f64 = breakdown.values().sum();

    ScoredListing {
        listing: listing.clone(),
        score,
        score_breakdown: breakdown,
    }
}

/// Raw sub-score of one factor, bounded to [-1, 1] before weighting.
fn evaluate(factor: &Factor, listing: &Listing, ctx: &ScoreContext) -> f64 {
    match factor {
        Factor::Price { .. } => price_sub_score(listing, ctx),
        Factor::Brand { desirable, .. } => brand_sub_score(listing, desirable),
        Factor::Condition { .. } => listing.condition.map(|c| c.rank()).unwrap_or(0.0),
        Factor::Keyword { bonus_terms, penalty_terms, .. } => {
            keyword_sub_score(listing, bonus_terms, penalty_terms)
        }
        Factor::Recency { .. } => recency_sub_score(listing, ctx.now_secs),
        Factor::Engagement { .. } => engagement_sub_score(listing),
    }
}

/// Discount fraction against the category median: a listing at half the
/// median scores 0.5, at or above the median scores 0. No category or no
/// median → 0.
fn price_sub_score(listing: &Listing, ctx: &ScoreContext) -> f64 {
    let Some(category) = &listing.category else { return 0.0 };
    let Some(median) = ctx.median_for(category) else { return 0.0 };
    if median <= 0.0 {
        return 0.0;
    }
    clamp((median - listing.price) / median, 0.0, 1.0)
}

fn brand_sub_score(listing: &Listing, desirable: &[String]) -> f64 {
    match &listing.brand {
        None => 0.0,
        Some(brand) => {
            let b = brand.to_lowercase();
            if desirable.iter().any(|d| *d == b) {
                1.0
            } else {
                // Known brand, just not on the hot list.
                0.3
            }
        }
    }
}

fn keyword_sub_score(listing: &Listing, bonus: &[String], penalty: &[String]) -> f64 {
    let text = format!("{} {}", listing.title, listing.description).to_lowercase();
    let bonus_hits = bonus.iter().filter(|t| text.contains(t.as_str())).count() as f64;
    let penalty_hits = penalty.iter().filter(|t| text.contains(t.as_str())).count() as f64;
    clamp(0.25 * bonus_hits - 0.5 * penalty_hits, -1.0, 1.0)
}

fn recency_sub_score(listing: &Listing, now_secs: u64) -> f64 {
    let Some(posted_at) = listing.posted_at else { return 0.0 };
    let age_secs = now_secs.saturating_sub(posted_at) as f64;
    clamp(1.0 - age_secs / RECENCY_HORIZON_SECS, 0.0, 1.0)
}

/// Log-damped social signal, matching the prototype's velocity term:
/// ln(1 + favorites + views/20) / 5, clamped to [0, 1].
fn engagement_sub_score(listing: &Listing) -> f64 {
    let signal = 1.0 + f64::from(listing.favorites) + f64::from(listing.views) / 20.0;
    clamp(signal.ln() / 5.0, 0.0, 1.0)
}

fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// Median of a price sample. Even-length samples average the two middles.
fn median(nums: &[f64]) -> Option<f64> {
    if nums.is_empty() {
        return None;
    }
    let mut sorted = nums.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing(id: &str, price: f64) -> Listing {
        Listing {
            id: id.to_string(),
            title: "Vintage denim jacket".to_string(),
            description: "Great shape".to_string(),
            price,
            currency: Some("EUR".to_string()),
            category: Some("jackets".to_string()),
            brand: Some("Levi's".to_string()),
            condition: Some(crate::types::Condition::VeryGood),
            posted_at: Some(999_000),
            favorites: 10,
            views: 200,
            url: None,
            item_count: 1,
            seen_at_ns: 1,
            last_seen_ns: 1,
            stale: false,
            raw: json!({}),
        }
    }

    fn ctx_for(listings: &[Listing]) -> ScoreContext {
        ScoreContext::build(listings, 1_000_000)
    }

    #[test]
    fn scoring_is_deterministic() {
        let pool = vec![listing("a", 10.0), listing("b", 20.0), listing("c", 30.0)];
        let model = ScoringModel::default();
        let ctx = ctx_for(&pool);

        let first = score(&pool[0], &model, &ctx);
        let second = score(&pool[0], &model, &ctx);
        assert_eq!(first.score.to_bits(), second.score.to_bits());
        assert_eq!(first.score_breakdown, second.score_breakdown);
    }

    #[test]
    fn missing_brand_contributes_zero_but_appears_in_breakdown() {
        let mut l = listing("a", 10.0);
        l.brand = None;
        let model = ScoringModel::default();
        let ctx = ctx_for(std::slice::from_ref(&l));

        let scored = score(&l, &model, &ctx);
        assert_eq!(scored.score_breakdown.get("brand"), Some(&0.0));
        assert!(scored.score.is_finite());
    }

    #[test]
    fn below_median_price_scores_higher() {
        let pool = vec![listing("a", 10.0), listing("b", 20.0), listing("c", 30.0)];
        let model = ScoringModel { factors: vec![Factor::Price { weight: 1.0 }] };
        let ctx = ctx_for(&pool);

        let cheap = score(&pool[0], &model, &ctx);
        let dear = score(&pool[2], &model, &ctx);
        assert!(cheap.score > dear.score);
        // At 10 against a median of 20 the discount fraction is 0.5.
        assert!((cheap.score - 0.5).abs() < 1e-9);
        // Above the median the factor bottoms out at 0, never negative.
        assert!((dear.score - 0.0).abs() < 1e-9);
    }

    #[test]
    fn uncategorized_listing_gets_zero_price_factor() {
        let mut l = listing("a", 10.0);
        l.category = None;
        let model = ScoringModel { factors: vec![Factor::Price { weight: 1.0 }] };
        let ctx = ctx_for(std::slice::from_ref(&l));
        assert_eq!(score(&l, &model, &ctx).score, 0.0);
    }

    #[test]
    fn penalty_terms_drag_the_keyword_factor_negative() {
        let mut l = listing("a", 10.0);
        l.title = "Broken zipper, needs repair".to_string();
        l.description = String::new();
        let model = ScoringModel {
            factors: vec![Factor::Keyword {
                weight: 1.0,
                bonus_terms: vec!["vintage".to_string()],
                penalty_terms: vec!["broken".to_string(), "repair".to_string()],
            }],
        };
        let ctx = ctx_for(std::slice::from_ref(&l));
        assert!((score(&l, &model, &ctx).score - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn recency_decays_over_a_week() {
        let model = ScoringModel { factors: vec![Factor::Recency { weight: 1.0 }] };

        let mut fresh = listing("a", 10.0);
        fresh.posted_at = Some(1_000_000);
        // Posted far enough back that the week-long horizon has fully decayed.
        let mut old = listing("b", 10.0);
        old.posted_at = Some(0);

        let pool = vec![fresh.clone(), old.clone()];
        let ctx = ctx_for(&pool);
        assert!((score(&fresh, &model, &ctx).score - 1.0).abs() < 1e-9);
        assert_eq!(score(&old, &model, &ctx).score, 0.0);
    }

    #[test]
    fn engagement_is_bounded() {
        let mut l = listing("a", 10.0);
        l.favorites = u32::MAX;
        l.views = u32::MAX;
        let model = ScoringModel { factors: vec![Factor::Engagement { weight: 1.0 }] };
        let ctx = ctx_for(std::slice::from_ref(&l));

        let s = score(&l, &model, &ctx).score;
        assert!(s <= 1.0 && s >= 0.0);
    }

    #[test]
    fn median_of_even_sample_averages_middles() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[5.0]), Some(5.0));
        assert_eq!(median(&[]), None);
    }
}
