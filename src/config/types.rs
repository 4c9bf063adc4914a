//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Backend pool definitions
    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    /// Host/path routes onto pools
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Adaptive strategy settings
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Load balancing algorithm of a pool.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    #[serde(alias = "least_connections")]
    LeastConn,
    IpHash,
    /// Weighted random selection, kept under its historical name.
    WeightedRoundRobin,
    GeoProximity,
}

impl Algorithm {
    /// All pool algorithms, in declaration order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::RoundRobin,
        Algorithm::LeastConn,
        Algorithm::IpHash,
        Algorithm::WeightedRoundRobin,
        Algorithm::GeoProximity,
    ];

    /// The wire name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConn => "least_conn",
            Algorithm::IpHash => "ip_hash",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
            Algorithm::GeoProximity => "geo_proximity",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Algorithm::RoundRobin),
            "least_conn" | "least_connections" => Ok(Algorithm::LeastConn),
            "ip_hash" => Ok(Algorithm::IpHash),
            "weighted_round_robin" => Ok(Algorithm::WeightedRoundRobin),
            "geo_proximity" => Ok(Algorithm::GeoProximity),
            other => Err(format!("unknown algorithm '{}'", other)),
        }
    }
}

/// Backend pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PoolConfig {
    /// Unique name for this pool
    pub name: String,

    /// Selection algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Bind sessions to the backend that served them first
    #[serde(default)]
    pub sticky_sessions: bool,

    /// Upstream backends, in selection order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Individual backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Backend address (unique within its pool)
    pub address: String,

    /// Weight for weighted selection; values <= 0 are treated as 1
    #[serde(default = "default_weight")]
    pub weight: i64,

    /// Region used by geo-proximity routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl BackendConfig {
    /// Create a backend with weight 1 and no region.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            weight: default_weight(),
            region: None,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Route from host and path prefix onto a pool.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Host header to match; empty matches any host
    #[serde(default)]
    pub host: String,

    /// Path prefix to match
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Target pool name
    pub pool: String,
}

/// Settings for the adaptive strategy orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AdaptiveConfig {
    /// Ask the predictor for a strategy on every request
    #[serde(default)]
    pub ai_enabled: bool,

    /// How often the adaptation loop re-evaluates the strategy
    #[serde(default = "default_adaptation_interval", with = "humantime_serde")]
    pub adaptation_interval: Duration,

    /// How often the metrics aggregator runs
    #[serde(default = "default_metrics_interval", with = "humantime_serde")]
    pub metrics_interval: Duration,

    /// Age after which aggregated counters are reset
    #[serde(default = "default_metrics_reset_after", with = "humantime_serde")]
    pub metrics_reset_after: Duration,

    /// Minimum predictor confidence to adopt its recommendation
    #[serde(default = "default_min_confidence")]
    pub min_confidence_level: f64,

    /// Strategy used when the predictor is unavailable or unsure
    #[serde(default = "default_fallback_algorithm")]
    pub fallback_algorithm: String,

    /// Ask the predictor to analyze each request's application context
    #[serde(default)]
    pub application_aware: bool,

    /// Passed through to the predictor
    #[serde(default)]
    pub predictive_scaling: bool,

    /// Passed through to the predictor
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Passed through to the predictor
    #[serde(default = "default_exploration_rate")]
    pub exploration_rate: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            ai_enabled: false,
            adaptation_interval: default_adaptation_interval(),
            metrics_interval: default_metrics_interval(),
            metrics_reset_after: default_metrics_reset_after(),
            min_confidence_level: default_min_confidence(),
            fallback_algorithm: default_fallback_algorithm(),
            application_aware: false,
            predictive_scaling: false,
            learning_rate: default_learning_rate(),
            exploration_rate: default_exploration_rate(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_weight() -> i64 {
    1
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_adaptation_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics_reset_after() -> Duration {
    Duration::from_secs(3600)
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_fallback_algorithm() -> String {
    Algorithm::RoundRobin.as_str().to_string()
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_exploration_rate() -> f64 {
    0.1
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
