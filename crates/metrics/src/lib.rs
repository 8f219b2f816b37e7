//! Metrics Collector (§4.8): monotonic counters for requests, outcomes,
//! and retries, broken down globally, per domain, and per failure type.
//!
//! Counters are plain `AtomicU64`s behind a `DashMap`, the same
//! concurrency shape as the round-robin client counter in the network
//! driver this was grounded on, just one counter per metric instead of
//! one counter for client selection.

use std::sync::atomic::{AtomicU64, Ordering};

use crawlhub_core::FailureType;
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    rate_limit_hits: AtomicU64,
    circuit_breaker_triggers: AtomicU64,
}

#[derive(Debug, Serialize, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub rate_limit_hits: u64,
    pub circuit_breaker_triggers: u64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            circuit_breaker_triggers: self.circuit_breaker_triggers.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub global: CounterSnapshot,
    pub by_domain: std::collections::HashMap<String, CounterSnapshot>,
    pub by_failure_type: std::collections::HashMap<String, u64>,
}

/// Session-scoped metrics accumulator (C8). One instance per crawl
/// session; cheap to clone via `Arc` at the call sites that need it.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    global: Counters,
    by_domain: DashMap<String, Counters>,
    by_failure_type: DashMap<FailureType, AtomicU64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, domain: &str) {
        self.global.requests.fetch_add(1, Ordering::Relaxed);
        self.domain_counters(domain).requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, domain: &str) {
        self.global.successes.fetch_add(1, Ordering::Relaxed);
        self.domain_counters(domain).successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, domain: &str, failure_type: FailureType) {
        self.global.failures.fetch_add(1, Ordering::Relaxed);
        self.domain_counters(domain).failures.fetch_add(1, Ordering::Relaxed);
        self.by_failure_type
            .entry(failure_type)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self, domain: &str) {
        self.global.retries.fetch_add(1, Ordering::Relaxed);
        self.domain_counters(domain).retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_hit(&self, domain: &str) {
        self.global.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        self.domain_counters(domain)
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trigger(&self, domain: &str) {
        self.global
            .circuit_breaker_triggers
            .fetch_add(1, Ordering::Relaxed);
        self.domain_counters(domain)
            .circuit_breaker_triggers
            .fetch_add(1, Ordering::Relaxed);
    }

    fn domain_counters(&self, domain: &str) -> dashmap::mapref::one::Ref<'_, String, Counters> {
        if !self.by_domain.contains_key(domain) {
            self.by_domain.entry(domain.to_string()).or_default();
        }
        self.by_domain.get(domain).expect("just inserted")
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            global: self.global.snapshot(),
            by_domain: self
                .by_domain
                .iter()
                .map(|e| (e.key().clone(), e.value().snapshot()))
                .collect(),
            by_failure_type: self
                .by_failure_type
                .iter()
                .map(|e| (format!("{:?}", e.key()), e.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }

    /// Human-readable digest emitted at session end, per §4.8.
    pub fn log_summary(&self) {
        let snap = self.snapshot();
        tracing::info!(
            requests = snap.global.requests,
            successes = snap.global.successes,
            failures = snap.global.failures,
            retries = snap.global.retries,
            rate_limit_hits = snap.global.rate_limit_hits,
            circuit_breaker_triggers = snap.global.circuit_breaker_triggers,
            domains = snap.by_domain.len(),
            "crawl session summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_global_and_per_domain_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_request("a.com");
        metrics.record_request("a.com");
        metrics.record_request("b.com");
        metrics.record_success("a.com");
        metrics.record_failure("a.com", FailureType::Connection);

        let snap = metrics.snapshot();
        assert_eq!(snap.global.requests, 3);
        assert_eq!(snap.by_domain["a.com"].requests, 2);
        assert_eq!(snap.by_domain["b.com"].requests, 1);
        assert_eq!(snap.global.successes, 1);
        assert_eq!(snap.global.failures, 1);
    }

    #[test]
    fn tracks_failure_type_breakdown() {
        let metrics = MetricsCollector::new();
        metrics.record_failure("a.com", FailureType::Timeout);
        metrics.record_failure("a.com", FailureType::Timeout);
        metrics.record_failure("a.com", FailureType::Temporary5xx);

        let snap = metrics.snapshot();
        assert_eq!(snap.by_failure_type["Timeout"], 2);
        assert_eq!(snap.by_failure_type["Temporary5xx"], 1);
    }

    #[test]
    fn circuit_breaker_and_rate_limit_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_circuit_breaker_trigger("cb.test");
        metrics.record_rate_limit_hit("cb.test");
        let snap = metrics.snapshot();
        assert_eq!(snap.global.circuit_breaker_triggers, 1);
        assert_eq!(snap.by_domain["cb.test"].rate_limit_hits, 1);
    }
}
