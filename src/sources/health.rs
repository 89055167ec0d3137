use crate::types::SourceHealth;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Passive health tracking shared by all adapters, so /health never spends
/// upstream quota on dedicated check requests. Everything here piggybacks
/// on the calls the engine makes anyway.
pub struct HealthTracker {
    // All timestamps are millis since epoch; zero means "never"
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, latency_ms: u64) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_success_ms.store(now_ms, Ordering::Relaxed);
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A source counts as healthy once it has succeeded and its most recent
    /// outcome was a success
    fn is_healthy(&self) -> bool {
        let last_success = self.last_success_ms.load(Ordering::Relaxed);
        let last_failure = self.last_failure_ms.load(Ordering::Relaxed);
        last_success > 0 && (last_failure == 0 || last_success > last_failure)
    }

    fn success_rate(&self) -> f64 {
        let successes = self.success_count.load(Ordering::Relaxed);
        let total = successes + self.failure_count.load(Ordering::Relaxed);
        if total == 0 {
            // Nothing observed yet; report a full rate rather than alarm
            return 1.0;
        }
        successes as f64 / total as f64
    }

    pub fn snapshot(&self, source: &str) -> SourceHealth {
        let last_success_ms = self.last_success_ms.load(Ordering::Relaxed);
        let last_success = if last_success_ms > 0 {
            DateTime::from_timestamp_millis(last_success_ms as i64)
        } else {
            None
        };

        let is_healthy = self.is_healthy();

        SourceHealth {
            source: source.to_string(),
            is_healthy,
            last_success,
            last_error: if is_healthy {
                None
            } else {
                Some("most recent request failed".to_string())
            },
            success_rate: self.success_rate(),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
