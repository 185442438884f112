use std::net::IpAddr;
use std::time::Duration;

use rand::Rng;

use crate::failure::{FailureConfig, FailureType};
use crate::ip_filter;
use crate::rate_limit::RateLimiter;

/// A synthetic response produced by a short-circuiting simulator stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthetic {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
    pub failure_type: FailureType,
}

impl Synthetic {
    fn injected(status: u16, message: &str, failure_type: FailureType) -> Self {
        Self {
            status,
            headers: vec![("content-type", "application/json".to_string())],
            body: serde_json::json!({
                "error": {
                    "message": message,
                    "type": "proxy_simulation",
                }
            })
            .to_string(),
            failure_type,
        }
    }
}

/// Outcome of running stages 1-4 of the failure pipeline.
#[derive(Debug, PartialEq)]
pub enum Verdict {
    /// Proceed to cache/upstream.
    Pass,
    /// Answer immediately with a synthetic response.
    Reject(Synthetic),
    /// Stall for the duration, then answer 504.
    TimeoutAfter(Duration),
    /// Never answer; the suspension ends when the client disconnects.
    HangForever,
}

/// Run the pre-request stages in their fixed order: IP filter, rate limit,
/// timeout injection, error injection. Stages share no state beyond the
/// per-proxy rate-limit bucket.
pub fn evaluate(
    config: &FailureConfig,
    proxy_id: i64,
    client_ip: IpAddr,
    limiter: &RateLimiter,
) -> Verdict {
    // Stage 1: IP filter
    if !ip_filter::is_allowed(config, client_ip) {
        return Verdict::Reject(Synthetic::injected(
            403,
            "client IP is not permitted by this proxy's IP filter",
            FailureType::IpBlocked,
        ));
    }

    // Stage 2: rate limit
    if config.rate_limiting_enabled
        && !limiter.try_acquire(proxy_id, config.requests_per_minute)
    {
        let mut synthetic = Synthetic::injected(
            429,
            "rate limit exceeded",
            FailureType::RateLimited,
        );
        synthetic.headers.push(("retry-after", "60".to_string()));
        return Verdict::Reject(synthetic);
    }

    let mut rng = rand::rng();

    // Stage 3: timeout injection
    if config.timeout_enabled && rng.random::<f64>() < config.timeout_rate {
        return match config.timeout_seconds {
            Some(secs) => Verdict::TimeoutAfter(Duration::from_secs_f64(secs)),
            None => Verdict::HangForever,
        };
    }

    // Stage 4: error injection, ascending status-code order, independent draws
    if config.error_injection_enabled {
        for (&code, &rate) in &config.error_rates {
            if rng.random::<f64>() < rate {
                return Verdict::Reject(Synthetic::injected(
                    code,
                    "<injected>",
                    FailureType::InjectedError(code),
                ));
            }
        }
    }

    Verdict::Pass
}

/// The synthetic 504 emitted after a finite injected timeout elapses.
pub fn timeout_response() -> Synthetic {
    Synthetic::injected(
        504,
        "simulated upstream timeout",
        FailureType::Timeout,
    )
}

/// Post-response stage: draw the artificial delay, if one applies.
pub fn draw_response_delay(config: &FailureConfig, cache_hit: bool) -> Option<Duration> {
    if !config.response_delay_enabled {
        return None;
    }
    if config.response_delay_cache_only && !cache_hit {
        return None;
    }

    let min = config.response_delay_min_seconds.max(0.0);
    let max = config.response_delay_max_seconds.max(min);
    let secs = if max > min {
        rand::rng().random_range(min..=max)
    } else {
        min
    };
    Some(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn all_disabled_passes() {
        let limiter = RateLimiter::new();
        let verdict = evaluate(&FailureConfig::default(), 1, localhost(), &limiter);
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn ip_block_short_circuits_with_403() {
        let cfg = FailureConfig {
            ip_filtering_enabled: true,
            ip_blocklist: vec!["127.0.0.1".to_string()],
            ..Default::default()
        };
        let limiter = RateLimiter::new();
        match evaluate(&cfg, 1, localhost(), &limiter) {
            Verdict::Reject(s) => {
                assert_eq!(s.status, 403);
                assert_eq!(s.failure_type, FailureType::IpBlocked);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_returns_429_with_retry_after() {
        let cfg = FailureConfig {
            rate_limiting_enabled: true,
            requests_per_minute: 1,
            ..Default::default()
        };
        let limiter = RateLimiter::new();
        assert_eq!(evaluate(&cfg, 1, localhost(), &limiter), Verdict::Pass);
        match evaluate(&cfg, 1, localhost(), &limiter) {
            Verdict::Reject(s) => {
                assert_eq!(s.status, 429);
                assert_eq!(s.failure_type, FailureType::RateLimited);
                assert!(s.headers.iter().any(|(k, v)| *k == "retry-after" && v == "60"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn certain_timeout_stalls_for_configured_duration() {
        let cfg = FailureConfig {
            timeout_enabled: true,
            timeout_rate: 1.0,
            timeout_seconds: Some(2.5),
            ..Default::default()
        };
        let limiter = RateLimiter::new();
        assert_eq!(
            evaluate(&cfg, 1, localhost(), &limiter),
            Verdict::TimeoutAfter(Duration::from_secs_f64(2.5))
        );
    }

    #[test]
    fn infinite_timeout_hangs() {
        let cfg = FailureConfig {
            timeout_enabled: true,
            timeout_rate: 1.0,
            timeout_seconds: None,
            ..Default::default()
        };
        let limiter = RateLimiter::new();
        assert_eq!(evaluate(&cfg, 1, localhost(), &limiter), Verdict::HangForever);
    }

    #[test]
    fn zero_rate_timeout_never_fires() {
        let cfg = FailureConfig {
            timeout_enabled: true,
            timeout_rate: 0.0,
            ..Default::default()
        };
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert_eq!(evaluate(&cfg, 1, localhost(), &limiter), Verdict::Pass);
        }
    }

    #[test]
    fn error_injection_picks_lowest_certain_code() {
        let mut error_rates = BTreeMap::new();
        error_rates.insert(503, 1.0);
        error_rates.insert(429, 1.0);
        let cfg = FailureConfig {
            error_injection_enabled: true,
            error_rates,
            ..Default::default()
        };
        let limiter = RateLimiter::new();
        match evaluate(&cfg, 1, localhost(), &limiter) {
            Verdict::Reject(s) => {
                assert_eq!(s.status, 429);
                assert_eq!(s.failure_type, FailureType::InjectedError(429));
                assert!(s.body.contains("proxy_simulation"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn timeout_response_is_504() {
        let s = timeout_response();
        assert_eq!(s.status, 504);
        assert_eq!(s.failure_type, FailureType::Timeout);
    }

    #[test]
    fn delay_disabled_draws_nothing() {
        assert_eq!(draw_response_delay(&FailureConfig::default(), true), None);
    }

    #[test]
    fn delay_respects_bounds() {
        let cfg = FailureConfig {
            response_delay_enabled: true,
            response_delay_min_seconds: 0.5,
            response_delay_max_seconds: 1.5,
            ..Default::default()
        };
        for _ in 0..100 {
            let d = draw_response_delay(&cfg, false).unwrap();
            assert!(d >= Duration::from_secs_f64(0.5));
            assert!(d <= Duration::from_secs_f64(1.5));
        }
    }

    #[test]
    fn cache_only_delay_skips_misses() {
        let cfg = FailureConfig {
            response_delay_enabled: true,
            response_delay_min_seconds: 1.0,
            response_delay_max_seconds: 1.0,
            response_delay_cache_only: true,
            ..Default::default()
        };
        assert_eq!(draw_response_delay(&cfg, false), None);
        assert_eq!(
            draw_response_delay(&cfg, true),
            Some(Duration::from_secs(1))
        );
    }
}
