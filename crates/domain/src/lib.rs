//! Per-domain politeness delay, failure tracking, and circuit breaking
//! (§4.3). Grounded on the concurrent per-host state map pattern the
//! frontier uses for `host_last_seen`, generalized from a single instant
//! into the full domain state machine the spec requires.

use chrono::{DateTime, Utc};
use crawlhub_core::{CircuitState, FailureType};
use dashmap::DashMap;
use std::time::Duration;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_OPEN_DURATION_SECS: i64 = 60;
const MAX_OPEN_DURATION_SECS: i64 = 30 * 60;
const DEFAULT_RATE_LIMIT_BACKOFF_SECS: i64 = 60;
const MAX_RATE_LIMIT_BACKOFF_SECS: i64 = 30 * 60;

#[derive(Debug, Clone)]
struct DomainState {
    last_request_at: Option<DateTime<Utc>>,
    min_interval: Duration,
    consecutive_failures: u32,
    circuit_state: CircuitState,
    circuit_opened_at: Option<DateTime<Utc>>,
    current_open_duration_secs: i64,
    rate_limited_until: Option<DateTime<Utc>>,
    current_rate_limit_backoff_secs: i64,
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            last_request_at: None,
            min_interval: Duration::from_secs(1),
            consecutive_failures: 0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            current_open_duration_secs: DEFAULT_OPEN_DURATION_SECS,
            rate_limited_until: None,
            current_rate_limit_backoff_secs: DEFAULT_RATE_LIMIT_BACKOFF_SECS,
        }
    }
}

pub struct DomainManager {
    domains: DashMap<String, DomainState>,
    failure_threshold: u32,
}

impl Default for DomainManager {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl DomainManager {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            domains: DashMap::new(),
            failure_threshold,
        }
    }

    fn refresh_circuit(&self, state: &mut DomainState) {
        if state.circuit_state == CircuitState::Open {
            if let Some(opened_at) = state.circuit_opened_at {
                let reopen_at = opened_at + chrono::Duration::seconds(state.current_open_duration_secs);
                if Utc::now() >= reopen_at {
                    state.circuit_state = CircuitState::HalfOpen;
                }
            }
        }
    }

    pub fn set_min_interval(&self, domain: &str, interval: Duration) {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        entry.min_interval = interval;
    }

    pub fn should_delay(&self, domain: &str) -> bool {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        self.refresh_circuit(&mut entry);
        if let Some(until) = entry.rate_limited_until {
            if Utc::now() < until {
                return true;
            }
        }
        match entry.last_request_at {
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                elapsed
                    < chrono::Duration::from_std(entry.min_interval).unwrap_or_default()
            }
            None => false,
        }
    }

    pub fn get_delay(&self, domain: &str) -> Duration {
        let entry = self.domains.entry(domain.to_string()).or_default();
        let now = Utc::now();
        let mut remaining = Duration::ZERO;
        if let Some(until) = entry.rate_limited_until {
            if now < until {
                remaining = remaining.max((until - now).to_std().unwrap_or_default());
            }
        }
        if let Some(last) = entry.last_request_at {
            let next_allowed = last + chrono::Duration::from_std(entry.min_interval).unwrap_or_default();
            if now < next_allowed {
                remaining = remaining.max((next_allowed - now).to_std().unwrap_or_default());
            }
        }
        remaining
    }

    pub fn is_circuit_breaker_open(&self, domain: &str) -> bool {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        self.refresh_circuit(&mut entry);
        entry.circuit_state == CircuitState::Open
    }

    pub fn record_request(&self, domain: &str) {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        entry.last_request_at = Some(Utc::now());
    }

    /// A successful fetch. Closes the circuit on a HALF_OPEN success and
    /// clears any rate-limit cooldown.
    pub fn record_success(&self, domain: &str) {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        self.refresh_circuit(&mut entry);
        entry.consecutive_failures = 0;
        entry.circuit_state = CircuitState::Closed;
        entry.circuit_opened_at = None;
        entry.current_open_duration_secs = DEFAULT_OPEN_DURATION_SECS;
        entry.rate_limited_until = None;
        entry.current_rate_limit_backoff_secs = DEFAULT_RATE_LIMIT_BACKOFF_SECS;
    }

    /// A failed fetch that isn't a rate limit. Trips the circuit once
    /// `failure_threshold` consecutive failures accumulate, doubling the
    /// open duration on each re-open up to a cap.
    pub fn record_failure(&self, domain: &str, _failure_type: FailureType) {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        self.refresh_circuit(&mut entry);
        entry.consecutive_failures += 1;

        let should_open = entry.consecutive_failures >= self.failure_threshold
            || entry.circuit_state == CircuitState::HalfOpen;
        if should_open {
            if entry.circuit_state == CircuitState::Open {
                entry.current_open_duration_secs =
                    (entry.current_open_duration_secs * 2).min(MAX_OPEN_DURATION_SECS);
            } else if entry.circuit_state != CircuitState::HalfOpen {
                entry.current_open_duration_secs = DEFAULT_OPEN_DURATION_SECS;
            } else {
                entry.current_open_duration_secs =
                    (entry.current_open_duration_secs * 2).min(MAX_OPEN_DURATION_SECS);
            }
            entry.circuit_state = CircuitState::Open;
            entry.circuit_opened_at = Some(Utc::now());
        }
    }

    pub fn record_rate_limit(&self, domain: &str) {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        let backoff = entry.current_rate_limit_backoff_secs;
        entry.rate_limited_until = Some(Utc::now() + chrono::Duration::seconds(backoff));
        entry.current_rate_limit_backoff_secs =
            (backoff * 2).min(MAX_RATE_LIMIT_BACKOFF_SECS);
    }

    pub fn circuit_state(&self, domain: &str) -> CircuitState {
        let mut entry = self.domains.entry(domain.to_string()).or_default();
        self.refresh_circuit(&mut entry);
        entry.circuit_state
    }

    pub fn consecutive_failures(&self, domain: &str) -> u32 {
        self.domains
            .get(domain)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_respects_min_interval() {
        let mgr = DomainManager::default();
        mgr.set_min_interval("a.com", Duration::from_secs(5));
        mgr.record_request("a.com");
        assert!(mgr.should_delay("a.com"));
        assert!(mgr.get_delay("a.com") <= Duration::from_secs(5));
    }

    #[test]
    fn circuit_opens_after_threshold_and_half_opens_then_closes() {
        let mgr = DomainManager::new(5);
        for _ in 0..5 {
            mgr.record_failure("cb.test", FailureType::Connection);
        }
        assert!(mgr.is_circuit_breaker_open("cb.test"));
        assert_eq!(mgr.circuit_state("cb.test"), CircuitState::Open);

        // Success should close it once half-open; here we simulate that by
        // directly recording success (the worker would only call this
        // after the circuit has transitioned out of OPEN).
        mgr.record_success("cb.test");
        assert_eq!(mgr.circuit_state("cb.test"), CircuitState::Closed);
        assert_eq!(mgr.consecutive_failures("cb.test"), 0);
    }

    #[test]
    fn rate_limit_backoff_doubles() {
        let mgr = DomainManager::default();
        mgr.record_rate_limit("rl.test");
        let first = mgr.get_delay("rl.test");
        mgr.record_rate_limit("rl.test");
        let second = mgr.get_delay("rl.test");
        assert!(second >= first);
    }

    #[test]
    fn success_clears_rate_limit() {
        let mgr = DomainManager::default();
        mgr.record_rate_limit("rl.test");
        assert!(mgr.should_delay("rl.test"));
        mgr.record_success("rl.test");
        assert!(!mgr.should_delay("rl.test"));
    }
}
