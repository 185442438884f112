use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::failure::FailureType;

/// Process-lifetime counters plus the in-flight gauge. Window aggregates
/// are derived from persisted log entries, not from these counters.
pub struct Metrics {
    in_flight: AtomicI64,
    pub total_requests: AtomicU64,
    pub total_failures: AtomicU64,
    created_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Increment the in-flight gauge; the returned guard decrements it on
    /// drop, including when the request task is cancelled.
    pub fn begin_request(self: Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { metrics: self }
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlightGuard {
    metrics: Arc<Metrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The slice of a log entry the aggregator needs.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub status_code: u16,
    pub latency_ms: i64,
    pub cache_hit: bool,
    pub failure_type: FailureType,
}

/// Rolling aggregates over one window of log entries.
#[derive(Debug, Clone, Serialize)]
pub struct WindowAggregates {
    pub window_seconds: u64,
    pub count: usize,
    pub rpm: f64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: i64,
    pub p99_latency_ms: i64,
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[i64], pct: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Aggregate the entries of one rolling window.
pub fn aggregate(entries: &[WindowEntry], window_seconds: u64) -> WindowAggregates {
    let count = entries.len();
    if count == 0 {
        return WindowAggregates {
            window_seconds,
            count: 0,
            rpm: 0.0,
            cache_hit_rate: 0.0,
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            p95_latency_ms: 0,
            p99_latency_ms: 0,
        };
    }

    let hits = entries.iter().filter(|e| e.cache_hit).count();
    let errors = entries
        .iter()
        .filter(|e| e.status_code >= 400 || e.failure_type != FailureType::None)
        .count();

    let mut latencies: Vec<i64> = entries.iter().map(|e| e.latency_ms).collect();
    latencies.sort_unstable();
    let sum: i64 = latencies.iter().sum();

    WindowAggregates {
        window_seconds,
        count,
        rpm: count as f64 * 60.0 / window_seconds as f64,
        cache_hit_rate: hits as f64 / count as f64,
        error_rate: errors as f64 / count as f64,
        avg_latency_ms: sum as f64 / count as f64,
        p95_latency_ms: percentile(&latencies, 95.0),
        p99_latency_ms: percentile(&latencies, 99.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: u16, latency: i64, hit: bool, ft: FailureType) -> WindowEntry {
        WindowEntry {
            status_code: status,
            latency_ms: latency,
            cache_hit: hit,
            failure_type: ft,
        }
    }

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = Arc::new(Metrics::new());
        {
            let _a = metrics.clone().begin_request();
            let _b = metrics.clone().begin_request();
            assert_eq!(metrics.in_flight(), 2);
        }
        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.total_requests.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn empty_window_aggregates_to_zero() {
        let agg = aggregate(&[], 60);
        assert_eq!(agg.count, 0);
        assert_eq!(agg.rpm, 0.0);
        assert_eq!(agg.p95_latency_ms, 0);
    }

    #[test]
    fn aggregates_rates_and_latency() {
        let entries = vec![
            entry(200, 100, true, FailureType::None),
            entry(200, 200, false, FailureType::None),
            entry(429, 5, false, FailureType::RateLimited),
            entry(502, 300, false, FailureType::UpstreamError),
        ];
        let agg = aggregate(&entries, 60);
        assert_eq!(agg.count, 4);
        assert_eq!(agg.rpm, 4.0);
        assert_eq!(agg.cache_hit_rate, 0.25);
        assert_eq!(agg.error_rate, 0.5);
        assert_eq!(agg.avg_latency_ms, 151.25);
    }

    #[test]
    fn injected_200_counts_as_error() {
        // failure_type != none marks an error even with a 2xx-looking status
        let entries = vec![entry(200, 10, false, FailureType::Timeout)];
        assert_eq!(aggregate(&entries, 60).error_rate, 1.0);
    }

    #[test]
    fn percentile_nearest_rank() {
        let sorted: Vec<i64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 95.0), 95);
        assert_eq!(percentile(&sorted, 99.0), 99);
        assert_eq!(percentile(&[42], 95.0), 42);
    }
}
