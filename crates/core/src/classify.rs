//! Failure classification: map a fetch outcome to a `FailureType` and
//! decide retryability/backoff (§4.2).

use crate::types::FailureType;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub rate_limit_initial_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            rate_limit_initial_delay: Duration::from_secs(60),
            jitter_fraction: 0.2,
        }
    }
}

/// Transport-layer signal, surfaced by the fetcher before any HTTP
/// status is available (DNS failure, connect refused, TLS handshake...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCode {
    None,
    Timeout,
    Connection,
    Dns,
    Ssl,
}

/// Pure classification function. `robots_blocked` takes precedence over
/// everything else since it's decided before any fetch is attempted.
pub fn classify(
    http_status: Option<u16>,
    transport: TransportCode,
    robots_blocked: bool,
    redirect_loop: bool,
) -> FailureType {
    if robots_blocked {
        return FailureType::RobotsBlocked;
    }
    match transport {
        TransportCode::Timeout => return FailureType::Timeout,
        TransportCode::Connection => return FailureType::Connection,
        TransportCode::Dns => return FailureType::Dns,
        TransportCode::Ssl => return FailureType::Ssl,
        TransportCode::None => {}
    }
    if redirect_loop {
        return FailureType::RedirectLoop;
    }
    match http_status {
        Some(429) => FailureType::RateLimited,
        Some(s) if (500..600).contains(&s) => FailureType::Temporary5xx,
        Some(408) => FailureType::Timeout,
        Some(s) if (400..500).contains(&s) => FailureType::Permanent4xx,
        None => FailureType::Unknown,
        Some(_) => FailureType::Unknown,
    }
}

pub fn should_retry(failure: FailureType, retry_count: u32, max_retries: u32) -> bool {
    failure.retryable() && retry_count < max_retries
}

/// `min(maxDelay, initial * multiplier^(nextAttempt-1))` with optional
/// jitter. `RATE_LIMITED` starts from a distinct, longer base delay.
pub fn calculate_retry_delay(
    next_attempt: u32,
    cfg: &RetryConfig,
    failure: FailureType,
) -> Duration {
    let base = if failure == FailureType::RateLimited {
        cfg.rate_limit_initial_delay
    } else {
        cfg.initial_delay
    };
    let exponent = next_attempt.saturating_sub(1) as i32;
    let scaled = base.as_secs_f64() * cfg.backoff_multiplier.powi(exponent);
    let capped = scaled.min(cfg.max_delay.as_secs_f64());

    let jittered = if cfg.jitter_fraction > 0.0 {
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-cfg.jitter_fraction..=cfg.jitter_fraction);
        (capped * (1.0 + jitter)).max(0.0)
    } else {
        capped
    };

    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_robots_before_transport() {
        assert_eq!(
            classify(None, TransportCode::Timeout, true, false),
            FailureType::RobotsBlocked
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            classify(Some(429), TransportCode::None, false, false),
            FailureType::RateLimited
        );
        assert_eq!(
            classify(Some(503), TransportCode::None, false, false),
            FailureType::Temporary5xx
        );
        assert_eq!(
            classify(Some(408), TransportCode::None, false, false),
            FailureType::Timeout
        );
        assert_eq!(
            classify(Some(404), TransportCode::None, false, false),
            FailureType::Permanent4xx
        );
        assert_eq!(
            classify(Some(200), TransportCode::None, false, false),
            FailureType::Unknown
        );
    }

    #[test]
    fn redirect_loop_takes_precedence_over_status() {
        assert_eq!(
            classify(Some(301), TransportCode::None, false, true),
            FailureType::RedirectLoop
        );
    }

    #[test]
    fn should_retry_respects_cap_and_retryability() {
        assert!(should_retry(FailureType::Temporary5xx, 2, 3));
        assert!(!should_retry(FailureType::Temporary5xx, 3, 3));
        assert!(!should_retry(FailureType::Permanent4xx, 0, 3));
    }

    #[test]
    fn rate_limit_delay_is_far_larger_than_default() {
        let cfg = RetryConfig {
            jitter_fraction: 0.0,
            ..Default::default()
        };
        let normal = calculate_retry_delay(1, &cfg, FailureType::Temporary5xx);
        let rate_limited = calculate_retry_delay(1, &cfg, FailureType::RateLimited);
        assert!(rate_limited > normal);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let cfg = RetryConfig {
            jitter_fraction: 0.0,
            ..Default::default()
        };
        let delay = calculate_retry_delay(20, &cfg, FailureType::Temporary5xx);
        assert_eq!(delay, cfg.max_delay);
    }
}
