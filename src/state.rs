//! Shared application state.

use crate::backend::{BalancerResult, Registry};
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::orchestrator::{DisabledPredictor, Orchestrator, Predictor};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared state accessible from all tasks.
#[derive(Clone)]
pub struct AppState {
    /// Current configuration.
    config: Arc<ArcSwap<Config>>,

    /// Pools, backends and sticky sessions.
    registry: Arc<Registry>,

    /// Strategy selection on top of the registry.
    orchestrator: Arc<Orchestrator>,

    metrics: MetricsCollector,
}

impl AppState {
    /// Build the registry and orchestrator with no predictor.
    pub fn new(config: Config) -> BalancerResult<Self> {
        Self::with_predictor(config, Arc::new(DisabledPredictor))
    }

    /// Build the registry and orchestrator around a predictor.
    pub fn with_predictor(config: Config, predictor: Arc<dyn Predictor>) -> BalancerResult<Self> {
        let metrics = MetricsCollector::new();
        let registry = Registry::new().with_metrics(metrics.clone());
        for pool in &config.pools {
            registry.add_pool(pool)?;
        }
        let registry = Arc::new(registry);
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::clone(&registry), predictor, config.adaptive.clone())
                .with_routes(config.routes.clone()),
        );

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            registry,
            orchestrator,
            metrics,
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> arc_swap::Guard<Arc<Config>> {
        self.config.load()
    }

    /// Swap the configuration and apply its adaptive settings.
    ///
    /// Pools are managed through the registry and are not rebuilt here.
    pub fn swap_config(&self, new_config: Config) {
        self.orchestrator.update_config(new_config.adaptive.clone());
        self.config.store(Arc::new(new_config));
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Stop background work.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
