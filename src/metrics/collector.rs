//! Metrics collector using prometheus-client.
//!
//! Provides metrics for selections, strategy decisions, connections and
//! backend health.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for selection metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SelectionLabels {
    pub pool: String,
    pub backend: String,
    pub strategy: String,
}

/// Labels for failed selections.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SelectionErrorLabels {
    pub pool: String,
    pub reason: String,
}

/// Labels for per-backend gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub pool: String,
    pub backend: String,
}

/// Labels for completed requests.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub pool: String,
    pub outcome: RequestOutcome,
}

/// Labels for per-pool histograms.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PoolLabels {
    pub pool: String,
}

/// Labels for strategy decisions.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub source: DecisionSource,
    pub outcome: DecisionOutcome,
}

/// Where a strategy decision was taken.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum DecisionSource {
    Request,
    Adaptation,
}

/// What a strategy decision resolved to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum DecisionOutcome {
    /// The predictor's recommendation was adopted.
    Adopted,
    /// The configured fallback was used.
    Fallback,
    /// The recommendation was not confident enough and the strategy was kept.
    Kept,
}

/// Result of a proxied request.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RequestOutcome {
    Success,
    Error,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Successful selections.
    selections_total: Family<SelectionLabels, Counter>,
    /// Failed selections by reason.
    selection_errors_total: Family<SelectionErrorLabels, Counter>,
    /// Strategy decisions.
    strategy_decisions_total: Family<DecisionLabels, Counter>,
    /// In-flight connections per backend.
    active_connections: Family<BackendLabels, Gauge>,
    /// Backend health gauge (1 = healthy, 0 = unhealthy).
    backend_health: Family<BackendLabels, Gauge>,
    /// Completed requests by outcome.
    requests_total: Family<RequestLabels, Counter>,
    /// Request duration histogram (in seconds).
    request_duration_seconds: Family<PoolLabels, Histogram>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let selections_total = Family::<SelectionLabels, Counter>::default();
        let selection_errors_total = Family::<SelectionErrorLabels, Counter>::default();
        let strategy_decisions_total = Family::<DecisionLabels, Counter>::default();
        let active_connections = Family::<BackendLabels, Gauge>::default();
        let backend_health = Family::<BackendLabels, Gauge>::default();
        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration_seconds = Family::<PoolLabels, Histogram>::new_with_constructor(|| {
            // Buckets: 1ms through roughly 10s
            Histogram::new(exponential_buckets(0.001, 2.5, 11))
        });

        registry.register(
            "tidelb_selections",
            "Total number of backend selections",
            selections_total.clone(),
        );
        registry.register(
            "tidelb_selection_errors",
            "Total number of failed backend selections",
            selection_errors_total.clone(),
        );
        registry.register(
            "tidelb_strategy_decisions",
            "Total number of strategy decisions",
            strategy_decisions_total.clone(),
        );
        registry.register(
            "tidelb_active_connections",
            "Number of in-flight connections per backend",
            active_connections.clone(),
        );
        registry.register(
            "tidelb_backend_health",
            "Backend health status (1=healthy, 0=unhealthy)",
            backend_health.clone(),
        );
        registry.register(
            "tidelb_requests",
            "Total number of completed requests",
            requests_total.clone(),
        );
        registry.register(
            "tidelb_request_duration_seconds",
            "Request duration in seconds",
            request_duration_seconds.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                selections_total,
                selection_errors_total,
                strategy_decisions_total,
                active_connections,
                backend_health,
                requests_total,
                request_duration_seconds,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Render all metrics in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.inner.registry)?;
        Ok(buffer)
    }

    pub fn record_selection(&self, pool: &str, backend: &str, strategy: &str) {
        let labels = SelectionLabels {
            pool: pool.to_string(),
            backend: backend.to_string(),
            strategy: strategy.to_string(),
        };
        self.inner.selections_total.get_or_create(&labels).inc();
    }

    pub fn record_selection_error(&self, pool: &str, reason: &str) {
        let labels = SelectionErrorLabels {
            pool: pool.to_string(),
            reason: reason.to_string(),
        };
        self.inner.selection_errors_total.get_or_create(&labels).inc();
    }

    pub fn record_strategy_decision(&self, source: DecisionSource, outcome: DecisionOutcome) {
        let labels = DecisionLabels { source, outcome };
        self.inner.strategy_decisions_total.get_or_create(&labels).inc();
    }

    /// Count of decisions with the given labels.
    pub fn strategy_decisions(&self, source: DecisionSource, outcome: DecisionOutcome) -> u64 {
        let labels = DecisionLabels { source, outcome };
        self.inner.strategy_decisions_total.get_or_create(&labels).get()
    }

    pub fn set_active_connections(&self, pool: &str, backend: &str, connections: u64) {
        let labels = BackendLabels {
            pool: pool.to_string(),
            backend: backend.to_string(),
        };
        self.inner
            .active_connections
            .get_or_create(&labels)
            .set(i64::try_from(connections).unwrap_or(i64::MAX));
    }

    /// Update backend health status.
    pub fn set_backend_health(&self, pool: &str, backend: &str, healthy: bool) {
        let labels = BackendLabels {
            pool: pool.to_string(),
            backend: backend.to_string(),
        };
        self.inner
            .backend_health
            .get_or_create(&labels)
            .set(if healthy { 1 } else { 0 });
    }

    /// Drop the per-backend gauges of a backend that left its pool.
    pub fn remove_backend(&self, pool: &str, backend: &str) {
        let labels = BackendLabels {
            pool: pool.to_string(),
            backend: backend.to_string(),
        };
        self.inner.active_connections.remove(&labels);
        self.inner.backend_health.remove(&labels);
    }

    /// Record a completed request.
    pub fn record_request(&self, pool: &str, duration: Duration, success: bool) {
        let labels = RequestLabels {
            pool: pool.to_string(),
            outcome: if success {
                RequestOutcome::Success
            } else {
                RequestOutcome::Error
            },
        };
        self.inner.requests_total.get_or_create(&labels).inc();

        let pool_labels = PoolLabels {
            pool: pool.to_string(),
        };
        self.inner
            .request_duration_seconds
            .get_or_create(&pool_labels)
            .observe(duration.as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
