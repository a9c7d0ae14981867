pub mod listing_scorer;
pub mod model;

pub use listing_scorer::{score, ScoreContext};
pub use model::{Factor, ScoringModel};
