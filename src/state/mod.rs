pub mod ranking_store;

pub use ranking_store::RankingStore;
