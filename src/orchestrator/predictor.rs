//! Strategy predictor contract.
//!
//! The predictor is an external collaborator: it learns from traffic
//! history and recommends a strategy by name. Model training and
//! inference live outside this crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form feature map passed to and from the predictor.
pub type Features = serde_json::Map<String, serde_json::Value>;

/// A strategy recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Strategy name, e.g. `least_conn` or `hybrid_intelligent`.
    pub algorithm: String,
    /// Trust in the recommendation, 0.0 to 1.0.
    pub confidence: f64,
    pub predicted_load: f64,
}

impl Prediction {
    pub fn new(algorithm: impl Into<String>, confidence: f64, predicted_load: f64) -> Self {
        Self {
            algorithm: algorithm.into(),
            confidence,
            predicted_load,
        }
    }
}

/// Why no recommendation could be made.
///
/// Never reaches callers of the orchestrator; it always resolves to the
/// fallback strategy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PredictorError {
    #[error("predictor unavailable: {0}")]
    Unavailable(String),

    #[error("insufficient training data: have {have} samples, need {need}")]
    InsufficientData { have: usize, need: usize },
}

/// Recommends strategies from observed traffic.
///
/// `predict_optimal_strategy` is called on the request path when adaptive
/// selection is enabled, so implementations must answer without blocking.
pub trait Predictor: Send + Sync {
    /// Feed an aggregated traffic sample.
    fn record_metrics(
        &self,
        request_rate: f64,
        avg_response_time: f64,
        error_rate: f64,
        features: &Features,
    );

    /// Current best strategy.
    fn predict_optimal_strategy(&self) -> Result<Prediction, PredictorError>;

    /// Feature map for one request. Only consulted when application
    /// awareness is enabled.
    fn analyze_application_context(
        &self,
        _request_type: &str,
        _content_type: &str,
        _user_agent: &str,
        _size: u64,
    ) -> Features {
        Features::new()
    }
}

/// Predictor that never recommends anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPredictor;

impl Predictor for DisabledPredictor {
    fn record_metrics(&self, _: f64, _: f64, _: f64, _: &Features) {}

    fn predict_optimal_strategy(&self) -> Result<Prediction, PredictorError> {
        Err(PredictorError::Unavailable("no model configured".to_string()))
    }
}
