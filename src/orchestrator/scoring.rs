//! Context-aware scorers.
//!
//! Each scorer is a [`LoadBalancer`] so the registry runs it with the same
//! health filtering, sticky handling and connection accounting as the pool
//! algorithms. Highest score wins; ties go to the first backend in list
//! order.

use crate::backend::Backend;
use crate::backend::algorithms::{LeastConnections, LoadBalancer, SelectionContext};
use crate::orchestrator::aggregator::MetricsAggregator;
use crate::orchestrator::context::RequestContext;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Backends used this recently score a recency bonus.
pub const RECENT_USE_WINDOW: Duration = Duration::from_secs(60);

/// Geo affinity assumed when no [`AffinityScorer`] is supplied.
pub const DEFAULT_GEO_AFFINITY: f64 = 0.5;

/// App compatibility assumed when no [`AffinityScorer`] is supplied.
pub const DEFAULT_APP_COMPATIBILITY: f64 = 0.7;

/// Supplies the hybrid scorer's affinity factors, each 0.0 to 1.0.
pub trait AffinityScorer: Send + Sync {
    fn geo_affinity(&self, backend: &Backend, client_ip: IpAddr) -> f64;

    fn app_compatibility(&self, backend: &Backend, ctx: &RequestContext) -> f64;
}

/// Score of a backend under `ai_optimized`. Unhealthy backends score 0.
pub fn ai_score(backend: &Backend) -> f64 {
    if !backend.is_healthy() {
        return 0.0;
    }
    let mut score = 1.0 - 0.1 * backend.connections() as f64;
    if backend.used_within(RECENT_USE_WINDOW) {
        score += 0.2;
    }
    score + 0.1 * f64::from(backend.weight()) + 0.5
}

fn highest_score<F>(backends: &[Arc<Backend>], score: F) -> Option<Arc<Backend>>
where
    F: Fn(&Backend) -> f64,
{
    let mut best: Option<(&Arc<Backend>, f64)> = None;
    for backend in backends {
        let s = score(backend);
        match best {
            Some((_, top)) if s <= top => {}
            _ => best = Some((backend, s)),
        }
    }
    best.map(|(backend, _)| Arc::clone(backend))
}

/// Favors idle, heavy and recently used backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct AiOptimized;

impl LoadBalancer for AiOptimized {
    fn name(&self) -> &str {
        "ai_optimized"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        highest_score(backends, ai_score)
    }
}

/// Least predicted load, where history adds to live connections.
#[derive(Debug)]
pub struct PredictiveLeastConn<'a> {
    pool: &'a str,
    history: &'a MetricsAggregator,
}

impl<'a> PredictiveLeastConn<'a> {
    pub fn new(pool: &'a str, history: &'a MetricsAggregator) -> Self {
        Self { pool, history }
    }

    pub fn predicted_load(&self, backend: &Backend) -> f64 {
        let historical = self.history.backend_requests(self.pool, backend.address());
        backend.connections() as f64 + 0.01 * historical as f64
    }
}

impl LoadBalancer for PredictiveLeastConn<'_> {
    fn name(&self) -> &str {
        "predictive_least_conn"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        highest_score(backends, |b| -self.predicted_load(b))
    }
}

/// First backend suited to the request, else least connections.
#[derive(Debug)]
pub struct ApplicationAware<'a> {
    request: &'a RequestContext,
}

impl<'a> ApplicationAware<'a> {
    pub fn new(request: &'a RequestContext) -> Self {
        Self { request }
    }

    /// Whether a backend suits the request. Checks apply in order and the
    /// first that applies decides.
    pub fn suits(&self, backend: &Backend) -> bool {
        if self.request.is_static {
            backend.connections() < 10
        } else if self.request.is_api {
            backend.weight() > 5
        } else if self.request.complexity > 3.0 {
            backend.connections() < 5
        } else {
            true
        }
    }
}

impl LoadBalancer for ApplicationAware<'_> {
    fn name(&self) -> &str {
        "application_aware"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        backends
            .iter()
            .find(|b| self.suits(b))
            .cloned()
            .or_else(|| LeastConnections::pick(backends))
    }
}

/// Weighted blend of the ai score, spare capacity and affinity.
pub struct HybridIntelligent<'a> {
    request: &'a RequestContext,
    affinity: Option<&'a dyn AffinityScorer>,
}

impl<'a> HybridIntelligent<'a> {
    pub fn new(request: &'a RequestContext, affinity: Option<&'a dyn AffinityScorer>) -> Self {
        Self { request, affinity }
    }

    pub fn score(&self, backend: &Backend, client_ip: IpAddr) -> f64 {
        let (geo, app) = match self.affinity {
            Some(scorer) => (
                scorer.geo_affinity(backend, client_ip),
                scorer.app_compatibility(backend, self.request),
            ),
            None => (DEFAULT_GEO_AFFINITY, DEFAULT_APP_COMPATIBILITY),
        };
        let capacity = 1.0 - backend.connections() as f64 / 100.0;

        0.4 * ai_score(backend) + 0.3 * capacity + 0.2 * geo + 0.1 * app
    }
}

impl LoadBalancer for HybridIntelligent<'_> {
    fn name(&self) -> &str {
        "hybrid_intelligent"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        highest_score(backends, |b| self.score(b, ctx.client_ip))
    }
}
