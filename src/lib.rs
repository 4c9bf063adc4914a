//! tidelb - traffic distribution core for a load balancer
//!
//! This crate provides:
//! - A registry of backend pools with five selection algorithms
//! - Sticky sessions, health and connection tracking
//! - A strategy orchestrator that adapts the selection strategy from
//!   predictor recommendations, with context-aware scorers
//! - Prometheus metrics

pub mod backend;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod state;
pub mod util;

pub use config::Config;
pub use orchestrator::Orchestrator;
pub use state::AppState;
