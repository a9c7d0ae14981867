//! Shared health state for the /status and /health endpoints.
//! Updated by the refresh pipeline, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Shared pipeline health metrics. The refresh pipeline writes, API reads.
#[derive(Default)]
pub struct HealthState {
    /// Nanosecond timestamp of the last successful publish (0 = none yet).
    pub last_published_at_ns: AtomicU64,
    pub cycles_ok: AtomicU64,
    pub cycles_failed: AtomicU64,
    /// Listings tracked by the deduplicator after the last cycle.
    pub listings_total: AtomicU64,
    pub listings_stale: AtomicU64,
    /// Raw records dropped by the normalizer in the last cycle.
    pub dropped_last_cycle: AtomicU64,
    /// Last cycle-level error message, cleared on the next success.
    last_error: Mutex<Option<String>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, published_at_ns: u64, total: u64, stale: u64, dropped: u64) {
        self.last_published_at_ns.store(published_at_ns, Ordering::Relaxed);
        self.cycles_ok.fetch_add(1, Ordering::Relaxed);
        self.listings_total.store(total, Ordering::Relaxed);
        self.listings_stale.store(stale, Ordering::Relaxed);
        self.dropped_last_cycle.store(dropped, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn record_failure(&self, error: String) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(error);
        }
    }

    pub fn last_published_at_ns(&self) -> u64 {
        self.last_published_at_ns.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn success_clears_last_error() {
        let health = HealthState::new();
        health.record_failure("fetch blew up".to_string());
        assert_eq!(health.cycles_failed.load(Ordering::Relaxed), 1);
        assert_eq!(health.last_error().as_deref(), Some("fetch blew up"));

        health.record_success(123, 10, 2, 1);
        assert_eq!(health.last_published_at_ns(), 123);
        assert_eq!(health.cycles_ok.load(Ordering::Relaxed), 1);
        assert!(health.last_error().is_none());
    }
}
