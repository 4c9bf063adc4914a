//! Metrics collection.

mod collector;

pub use collector::{DecisionOutcome, DecisionSource, MetricsCollector, RequestOutcome};
