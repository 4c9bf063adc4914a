//! Strategy names and the orchestrator's current choice.

use crate::config::Algorithm;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// A selection strategy the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One of the pool algorithms, run by the registry.
    Base(Algorithm),
    AiOptimized,
    PredictiveLeastConn,
    ApplicationAware,
    HybridIntelligent,
}

impl Strategy {
    /// The context-aware strategies, which only exist at the orchestrator.
    pub const CONTEXT_AWARE: [Strategy; 4] = [
        Strategy::AiOptimized,
        Strategy::PredictiveLeastConn,
        Strategy::ApplicationAware,
        Strategy::HybridIntelligent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Base(algorithm) => algorithm.as_str(),
            Strategy::AiOptimized => "ai_optimized",
            Strategy::PredictiveLeastConn => "predictive_least_conn",
            Strategy::ApplicationAware => "application_aware",
            Strategy::HybridIntelligent => "hybrid_intelligent",
        }
    }

    pub fn is_context_aware(&self) -> bool {
        !matches!(self, Strategy::Base(_))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Algorithm> for Strategy {
    fn from(algorithm: Algorithm) -> Self {
        Strategy::Base(algorithm)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_optimized" => Ok(Strategy::AiOptimized),
            "predictive_least_conn" => Ok(Strategy::PredictiveLeastConn),
            "application_aware" => Ok(Strategy::ApplicationAware),
            "hybrid_intelligent" => Ok(Strategy::HybridIntelligent),
            other => other
                .parse::<Algorithm>()
                .map(Strategy::Base)
                .map_err(|_| format!("unknown strategy: {other}")),
        }
    }
}

/// The strategy currently in effect.
///
/// The name is kept as the predictor reported it. Names that are not a
/// known [`Strategy`] make selection use each pool's own algorithm.
#[derive(Debug, Clone)]
pub struct StrategyState {
    pub current_algorithm: String,
    pub last_decision_at: Instant,
}

impl StrategyState {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current_algorithm: initial.into(),
            last_decision_at: Instant::now(),
        }
    }

    /// Record a decision. Returns true if the strategy changed.
    pub fn decide(&mut self, algorithm: &str) -> bool {
        self.last_decision_at = Instant::now();
        if self.current_algorithm == algorithm {
            return false;
        }
        self.current_algorithm = algorithm.to_string();
        true
    }
}
