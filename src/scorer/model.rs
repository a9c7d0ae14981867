use crate::error::{AppError, Result};

/// One scoring factor with its typed weight. Factors are interpretable on
/// purpose — every contribution lands in the score breakdown under the
/// factor's name.
#[derive(Debug, Clone, PartialEq)]
pub enum Factor {
    /// Discount versus the category median price.
    Price { weight: f64 },
    /// Brand desirability from a configured list.
    Brand { weight: f64, desirable: Vec<String> },
    /// Item condition rank.
    Condition { weight: f64 },
    /// Bonus/penalty terms matched against title and description.
    Keyword {
        weight: f64,
        bonus_terms: Vec<String>,
        penalty_terms: Vec<String>,
    },
    /// Posting freshness — recently listed items move faster.
    Recency { weight: f64 },
    /// Log-damped favorites/views signal.
    Engagement { weight: f64 },
}

impl Factor {
    pub fn name(&self) -> &'static str {
        match self {
            Factor::Price { .. } => "price",
            Factor::Brand { .. } => "brand",
            Factor::Condition { .. } => "condition",
            Factor::Keyword { .. } => "keyword",
            Factor::Recency { .. } => "recency",
            Factor::Engagement { .. } => "engagement",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Factor::Price { weight }
            | Factor::Brand { weight, .. }
            | Factor::Condition { weight }
            | Factor::Keyword { weight, .. }
            | Factor::Recency { weight }
            | Factor::Engagement { weight } => *weight,
        }
    }
}

/// The configured scoring model: an ordered set of weighted factors.
/// Aggregation is a plain sum of per-factor contributions, so the total is
/// independent of factor order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringModel {
    pub factors: Vec<Factor>,
}

impl ScoringModel {
    /// Build from env. `SCORER_FACTORS` is a comma list of factor names
    /// (default: all six); `SCORER_<NAME>_WEIGHT` overrides the default
    /// weight per factor. Fails on an unknown factor name — a typo must
    /// surface to the operator, not silently drop a factor.
    pub fn from_env() -> Result<Self> {
        let names = std::env::var("SCORER_FACTORS")
            .unwrap_or_else(|_| "price,brand,condition,keyword,recency,engagement".to_string());

        let mut factors = Vec::new();
        for name in names.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            factors.push(factor_from_env(name)?);
        }

        let model = Self { factors };
        model.validate()?;
        Ok(model)
    }

    /// Reject malformed configuration: negative or non-finite weights and
    /// duplicate factors. Listing content can never make scoring fail —
    /// only config can.
    pub fn validate(&self) -> Result<()> {
        let mut seen = Vec::new();
        for factor in &self.factors {
            let w = factor.weight();
            if !w.is_finite() {
                return Err(AppError::Scoring(format!(
                    "factor '{}' has non-finite weight",
                    factor.name()
                )));
            }
            if w < 0.0 {
                return Err(AppError::Scoring(format!(
                    "factor '{}' has negative weight {w}",
                    factor.name()
                )));
            }
            if seen.contains(&factor.name()) {
                return Err(AppError::Scoring(format!(
                    "factor '{}' configured twice",
                    factor.name()
                )));
            }
            seen.push(factor.name());
        }
        Ok(())
    }
}

impl Default for ScoringModel {
    /// Default weights carried over from the prototype heuristic: the
    /// price discount dominates, velocity-style signals (recency,
    /// engagement) together roughly match it, and keyword penalties act
    /// as the risk term.
    fn default() -> Self {
        Self {
            factors: vec![
                Factor::Price { weight: 0.40 },
                Factor::Brand { weight: 0.15, desirable: default_brands() },
                Factor::Condition { weight: 0.10 },
                Factor::Keyword {
                    weight: 0.10,
                    bonus_terms: default_bonus_terms(),
                    penalty_terms: default_penalty_terms(),
                },
                Factor::Recency { weight: 0.17 },
                Factor::Engagement { weight: 0.08 },
            ],
        }
    }
}

fn factor_from_env(name: &str) -> Result<Factor> {
    let factor = match name {
        "price" => Factor::Price { weight: weight_from_env("SCORER_PRICE_WEIGHT", 0.40)? },
        "brand" => Factor::Brand {
            weight: weight_from_env("SCORER_BRAND_WEIGHT", 0.15)?,
            desirable: list_from_env("SCORER_BRANDS_DESIRABLE", default_brands),
        },
        "condition" => Factor::Condition { weight: weight_from_env("SCORER_CONDITION_WEIGHT", 0.10)? },
        "keyword" => Factor::Keyword {
            weight: weight_from_env("SCORER_KEYWORD_WEIGHT", 0.10)?,
            bonus_terms: list_from_env("SCORER_KEYWORD_BONUS", default_bonus_terms),
            penalty_terms: list_from_env("SCORER_KEYWORD_PENALTY", default_penalty_terms),
        },
        "recency" => Factor::Recency { weight: weight_from_env("SCORER_RECENCY_WEIGHT", 0.17)? },
        "engagement" => Factor::Engagement { weight: weight_from_env("SCORER_ENGAGEMENT_WEIGHT", 0.08)? },
        other => {
            return Err(AppError::Scoring(format!("unknown scoring factor '{other}'")));
        }
    };
    Ok(factor)
}

fn weight_from_env(var: &str, default: f64) -> Result<f64> {
    match std::env::var(var) {
        Ok(s) => s
            .parse::<f64>()
            .map_err(|_| AppError::Scoring(format!("{var} must be a number"))),
        Err(_) => Ok(default),
    }
}

fn list_from_env(var: &str, default: fn() -> Vec<String>) -> Vec<String> {
    match std::env::var(var) {
        Ok(s) if !s.trim().is_empty() => s
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => default(),
    }
}

fn default_brands() -> Vec<String> {
    ["nike", "adidas", "levi's", "patagonia", "the north face", "carhartt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_bonus_terms() -> Vec<String> {
    ["vintage", "rare", "limited", "deadstock", "retro"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_penalty_terms() -> Vec<String> {
    ["damaged", "broken", "stained", "torn", "repair", "defect"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_validates() {
        assert!(ScoringModel::default().validate().is_ok());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let model = ScoringModel {
            factors: vec![Factor::Price { weight: -0.1 }],
        };
        let err = model.validate().unwrap_err();
        assert!(err.to_string().contains("negative weight"));
    }

    #[test]
    fn non_finite_weight_is_rejected() {
        let model = ScoringModel {
            factors: vec![Factor::Recency { weight: f64::NAN }],
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn duplicate_factor_is_rejected() {
        let model = ScoringModel {
            factors: vec![
                Factor::Price { weight: 0.4 },
                Factor::Price { weight: 0.2 },
            ],
        };
        let err = model.validate().unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn unknown_factor_name_is_rejected() {
        let err = factor_from_env("velocity").unwrap_err();
        assert!(err.to_string().contains("unknown scoring factor"));
    }

    #[test]
    fn zero_weight_disables_without_error() {
        let model = ScoringModel {
            factors: vec![Factor::Condition { weight: 0.0 }],
        };
        assert!(model.validate().is_ok());
    }
}
