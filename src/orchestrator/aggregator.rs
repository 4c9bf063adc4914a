//! Traffic history feeding the predictor and the predictive scorer.

use crate::orchestrator::predictor::Features;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Aggregated traffic since the last collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests per second.
    pub request_rate: f64,
    /// Mean response time of completed requests, in milliseconds.
    pub avg_response_time: f64,
    /// Errors per completed request, 0.0 to 1.0.
    pub error_rate: f64,
    pub features: Features,
}

#[derive(Debug, Default)]
struct PoolCounters {
    requests: u64,
    completed: u64,
    errors: u64,
    /// Cumulative milliseconds.
    response_time_ms: f64,
}

#[derive(Debug)]
struct AggregatorState {
    pools: HashMap<String, PoolCounters>,
    /// Selections per (pool, backend address).
    backend_requests: HashMap<(String, String), u64>,
    /// Throughput last reported from outside.
    throughput: f64,
    last_collection: Instant,
}

impl AggregatorState {
    fn new() -> Self {
        Self {
            pools: HashMap::new(),
            backend_requests: HashMap::new(),
            throughput: 0.0,
            last_collection: Instant::now(),
        }
    }
}

/// Per-pool request, error and latency counters.
#[derive(Debug)]
pub struct MetricsAggregator {
    state: RwLock<AggregatorState>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AggregatorState::new()),
        }
    }

    /// Count an incoming request for a pool.
    pub fn record_request(&self, pool: &str) {
        let mut state = self.state.write();
        state.pools.entry(pool.to_string()).or_default().requests += 1;
    }

    /// Count a selection of a backend.
    pub fn record_selection(&self, pool: &str, address: &str) {
        let mut state = self.state.write();
        *state
            .backend_requests
            .entry((pool.to_string(), address.to_string()))
            .or_default() += 1;
    }

    /// Record a completed request.
    pub fn record_outcome(&self, pool: &str, elapsed: Duration, success: bool) {
        let mut state = self.state.write();
        let counters = state.pools.entry(pool.to_string()).or_default();
        counters.completed += 1;
        counters.response_time_ms += elapsed.as_secs_f64() * 1000.0;
        if !success {
            counters.errors += 1;
        }
    }

    pub fn set_throughput(&self, throughput: f64) {
        self.state.write().throughput = throughput;
    }

    /// Historical selection count of one backend.
    pub fn backend_requests(&self, pool: &str, address: &str) -> u64 {
        self.state
            .read()
            .backend_requests
            .get(&(pool.to_string(), address.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn last_collection(&self) -> Instant {
        self.state.read().last_collection
    }

    /// Summarize traffic since the last collection.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read();

        let mut requests = 0u64;
        let mut completed = 0u64;
        let mut errors = 0u64;
        let mut response_time_ms = 0.0;
        for counters in state.pools.values() {
            requests += counters.requests;
            completed += counters.completed;
            errors += counters.errors;
            response_time_ms += counters.response_time_ms;
        }

        let elapsed = state.last_collection.elapsed().as_secs_f64();
        let request_rate = if elapsed > 0.0 { requests as f64 / elapsed } else { 0.0 };
        let (avg_response_time, error_rate) = if completed > 0 {
            (response_time_ms / completed as f64, errors as f64 / completed as f64)
        } else {
            (0.0, 0.0)
        };

        let mut features = Features::new();
        features.insert("total_requests".to_string(), Value::from(requests));
        features.insert("total_errors".to_string(), Value::from(errors));
        features.insert("pools".to_string(), Value::from(state.pools.len()));
        features.insert("throughput".to_string(), Value::from(state.throughput));

        MetricsSnapshot {
            request_rate,
            avg_response_time,
            error_rate,
            features,
        }
    }

    /// Clear all counters.
    pub fn reset(&self) {
        let mut state = self.state.write();
        let throughput = state.throughput;
        *state = AggregatorState::new();
        state.throughput = throughput;
    }

    /// Reset if the last collection is older than `max_age`. Returns true if
    /// the counters were cleared.
    pub fn reset_if_older_than(&self, max_age: Duration) -> bool {
        if self.last_collection().elapsed() < max_age {
            return false;
        }
        self.reset();
        true
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates() {
        let aggregator = MetricsAggregator::new();
        for _ in 0..4 {
            aggregator.record_request("web");
        }
        aggregator.record_outcome("web", Duration::from_millis(100), true);
        aggregator.record_outcome("web", Duration::from_millis(300), false);

        let snapshot = aggregator.snapshot();
        assert!((snapshot.avg_response_time - 200.0).abs() < 1e-6);
        assert!((snapshot.error_rate - 0.5).abs() < 1e-9);
        assert!(snapshot.request_rate > 0.0);
        assert_eq!(snapshot.features["total_requests"], Value::from(4u64));
        assert_eq!(snapshot.features["total_errors"], Value::from(1u64));
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsAggregator::new().snapshot();
        assert_eq!(snapshot.avg_response_time, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[test]
    fn test_backend_requests_per_pool() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_selection("web", "a");
        aggregator.record_selection("web", "a");
        aggregator.record_selection("api", "a");

        assert_eq!(aggregator.backend_requests("web", "a"), 2);
        assert_eq!(aggregator.backend_requests("api", "a"), 1);
        assert_eq!(aggregator.backend_requests("web", "b"), 0);
    }

    #[test]
    fn test_reset_keeps_throughput() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_request("web");
        aggregator.record_selection("web", "a");
        aggregator.set_throughput(42.0);

        assert!(!aggregator.reset_if_older_than(Duration::from_secs(3600)));
        assert!(aggregator.reset_if_older_than(Duration::ZERO));

        assert_eq!(aggregator.backend_requests("web", "a"), 0);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.features["total_requests"], Value::from(0u64));
        assert_eq!(snapshot.features["throughput"], Value::from(42.0));
    }
}
