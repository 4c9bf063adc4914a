//! Strategy orchestrator.
//!
//! Picks a selection strategy per request, consulting the predictor when
//! adaptive selection is enabled, and runs the selection through the
//! registry. Two background loops keep the strategy and the traffic
//! history current.

mod aggregator;
mod context;
mod predictor;
mod scoring;
mod strategy;

pub use aggregator::{MetricsAggregator, MetricsSnapshot};
pub use context::{
    ClientType, DEFAULT_POOL, Priority, RequestContext, RouteTable, client_ip, session_id,
};
pub use predictor::{DisabledPredictor, Features, Prediction, Predictor, PredictorError};
pub use scoring::{
    AffinityScorer, AiOptimized, ApplicationAware, DEFAULT_APP_COMPATIBILITY, DEFAULT_GEO_AFFINITY,
    HybridIntelligent, PredictiveLeastConn, ai_score,
};
pub use strategy::{Strategy, StrategyState};

use crate::backend::{Backend, BalancerResult, Registry};
use crate::config::{AdaptiveConfig, RouteConfig};
use crate::metrics::{DecisionOutcome, DecisionSource, MetricsCollector};
use crate::util::ShutdownSignal;
use arc_swap::ArcSwap;
use hyper::Request;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Shortest period a background loop will tick at.
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);

/// A backend chosen for one request.
///
/// Hand it back to [`Orchestrator::complete`] when the request finishes.
#[derive(Debug, Clone)]
pub struct Selection {
    pub pool: String,
    pub backend: Arc<Backend>,
    /// Strategy the selection was made under.
    pub strategy: String,
}

/// Serializable view of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub ai_enabled: bool,
    pub current_algorithm: String,
    pub seconds_since_last_decision: f64,
    pub fallback_algorithm: String,
    pub min_confidence_level: f64,
    pub metrics: MetricsSnapshot,
}

/// Chooses strategies and dispatches selections to the registry.
pub struct Orchestrator {
    registry: Arc<Registry>,
    predictor: Arc<dyn Predictor>,
    affinity: Option<Arc<dyn AffinityScorer>>,
    config: ArcSwap<AdaptiveConfig>,
    routes: RouteTable,
    state: RwLock<StrategyState>,
    aggregator: MetricsAggregator,
    metrics: MetricsCollector,
    shutdown: ShutdownSignal,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        predictor: Arc<dyn Predictor>,
        config: AdaptiveConfig,
    ) -> Self {
        let metrics = registry.metrics().clone();
        let state = StrategyState::new(config.fallback_algorithm.clone());

        Self {
            registry,
            predictor,
            affinity: None,
            config: ArcSwap::from_pointee(config),
            routes: RouteTable::default(),
            state: RwLock::new(state),
            aggregator: MetricsAggregator::new(),
            metrics,
            shutdown: ShutdownSignal::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_routes(mut self, routes: Vec<RouteConfig>) -> Self {
        self.routes = RouteTable::new(routes);
        self
    }

    /// Supply geo and app affinity for `hybrid_intelligent`.
    pub fn with_affinity_scorer(mut self, scorer: Arc<dyn AffinityScorer>) -> Self {
        self.affinity = Some(scorer);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn config(&self) -> Arc<AdaptiveConfig> {
        self.config.load_full()
    }

    /// Swap the adaptive settings.
    ///
    /// Running loops pick up new intervals after their next tick. Enabling
    /// adaptive selection does not start the loops; call [`start`](Self::start).
    pub fn update_config(&self, config: AdaptiveConfig) {
        info!(
            ai_enabled = config.ai_enabled,
            fallback = %config.fallback_algorithm,
            min_confidence = config.min_confidence_level,
            "adaptive configuration updated"
        );
        self.config.store(Arc::new(config));
    }

    pub fn current_strategy(&self) -> String {
        self.state.read().current_algorithm.clone()
    }

    pub fn last_decision_at(&self) -> Instant {
        self.state.read().last_decision_at
    }

    /// Select a backend for an HTTP request.
    ///
    /// Registry errors are returned unchanged. Predictor failures never are.
    pub fn select_backend<B>(
        &self,
        req: &Request<B>,
        peer: Option<SocketAddr>,
    ) -> BalancerResult<Selection> {
        let ctx = RequestContext::from_request(req);
        let pool = self.routes.pool_for(req);
        let client_ip = client_ip(req, peer);
        let session = session_id(req);

        self.select_for_pool(&pool, client_ip, session.as_deref(), &ctx)
    }

    /// Select a backend from a named pool.
    ///
    /// Only requests for registered pools are counted by the aggregator, so
    /// client-supplied pool names cannot grow it.
    pub fn select_for_pool(
        &self,
        pool: &str,
        client_ip: IpAddr,
        session_id: Option<&str>,
        ctx: &RequestContext,
    ) -> BalancerResult<Selection> {
        if self.registry.pool(pool).is_some() {
            self.aggregator.record_request(pool);
        }

        let config = self.config.load();
        let strategy = if config.ai_enabled {
            self.decide(&config, ctx)
        } else {
            config.fallback_algorithm.clone()
        };

        let backend = self.dispatch(pool, &strategy, client_ip, session_id, ctx)?;
        self.aggregator.record_selection(pool, backend.address());

        Ok(Selection {
            pool: pool.to_string(),
            backend,
            strategy,
        })
    }

    /// Strategy for one request under adaptive selection.
    fn decide(&self, config: &AdaptiveConfig, ctx: &RequestContext) -> String {
        if config.application_aware {
            let features = self.predictor.analyze_application_context(
                &ctx.method,
                &ctx.content_type,
                &ctx.user_agent,
                ctx.size,
            );
            trace!(features = features.len(), "analyzed application context");
        }

        match self.predictor.predict_optimal_strategy() {
            Ok(prediction) if prediction.confidence >= config.min_confidence_level => {
                self.state.write().decide(&prediction.algorithm);
                self.metrics
                    .record_strategy_decision(DecisionSource::Request, DecisionOutcome::Adopted);
                debug!(
                    strategy = %prediction.algorithm,
                    confidence = prediction.confidence,
                    predicted_load = prediction.predicted_load,
                    "using recommended strategy"
                );
                prediction.algorithm
            }
            Ok(prediction) => {
                debug!(
                    strategy = %prediction.algorithm,
                    confidence = prediction.confidence,
                    fallback = %config.fallback_algorithm,
                    "low confidence prediction, using fallback"
                );
                self.fall_back(config)
            }
            Err(e) => {
                debug!(
                    error = %e,
                    fallback = %config.fallback_algorithm,
                    "prediction unavailable, using fallback"
                );
                self.fall_back(config)
            }
        }
    }

    fn fall_back(&self, config: &AdaptiveConfig) -> String {
        self.state.write().decide(&config.fallback_algorithm);
        self.metrics
            .record_strategy_decision(DecisionSource::Request, DecisionOutcome::Fallback);
        config.fallback_algorithm.clone()
    }

    fn dispatch(
        &self,
        pool: &str,
        strategy: &str,
        client_ip: IpAddr,
        session_id: Option<&str>,
        ctx: &RequestContext,
    ) -> BalancerResult<Arc<Backend>> {
        let registry = &self.registry;
        match strategy.parse::<Strategy>() {
            Ok(Strategy::Base(algorithm)) => {
                registry.select_backend_with_algorithm(pool, algorithm, client_ip, session_id)
            }
            Ok(Strategy::AiOptimized) => {
                registry.select_backend_with(pool, &AiOptimized, client_ip, session_id)
            }
            Ok(Strategy::PredictiveLeastConn) => {
                let scorer = PredictiveLeastConn::new(pool, &self.aggregator);
                registry.select_backend_with(pool, &scorer, client_ip, session_id)
            }
            Ok(Strategy::ApplicationAware) => {
                let scorer = ApplicationAware::new(ctx);
                registry.select_backend_with(pool, &scorer, client_ip, session_id)
            }
            Ok(Strategy::HybridIntelligent) => {
                let scorer = HybridIntelligent::new(ctx, self.affinity.as_deref());
                registry.select_backend_with(pool, &scorer, client_ip, session_id)
            }
            Err(_) => {
                debug!(
                    strategy = %strategy,
                    pool = %pool,
                    "unknown strategy, using pool algorithm"
                );
                registry.select_backend(pool, client_ip, session_id)
            }
        }
    }

    /// Report a finished request.
    ///
    /// Releases the backend's connection and records the outcome.
    pub fn complete(&self, selection: &Selection, elapsed: Duration, success: bool) {
        self.registry
            .decrement_connections(&selection.pool, selection.backend.address());
        self.aggregator.record_outcome(&selection.pool, elapsed, success);
        self.metrics.record_request(&selection.pool, elapsed, success);
    }

    /// Forward externally gathered traffic metrics to the predictor.
    pub fn record_request_metrics(
        &self,
        request_rate: f64,
        avg_response_time: f64,
        error_rate: f64,
        features: &Features,
    ) {
        self.predictor
            .record_metrics(request_rate, avg_response_time, error_rate, features);
        self.aggregator.set_throughput(request_rate);
    }

    /// One adaptation round: feed the predictor and adopt its recommendation
    /// if it is confident. Returns the adopted strategy.
    pub fn perform_adaptation(&self) -> Option<String> {
        let snapshot = self.aggregator.snapshot();
        self.predictor.record_metrics(
            snapshot.request_rate,
            snapshot.avg_response_time,
            snapshot.error_rate,
            &snapshot.features,
        );

        let config = self.config.load();
        let prediction = match self.predictor.predict_optimal_strategy() {
            Ok(prediction) => prediction,
            Err(e) => {
                error!(error = %e, "adaptation failed to get a prediction");
                return None;
            }
        };

        if prediction.confidence < config.min_confidence_level {
            debug!(
                strategy = %prediction.algorithm,
                confidence = prediction.confidence,
                "prediction below confidence threshold, keeping strategy"
            );
            self.metrics
                .record_strategy_decision(DecisionSource::Adaptation, DecisionOutcome::Kept);
            return None;
        }

        let changed = self.state.write().decide(&prediction.algorithm);
        self.metrics
            .record_strategy_decision(DecisionSource::Adaptation, DecisionOutcome::Adopted);
        if changed {
            info!(
                strategy = %prediction.algorithm,
                confidence = prediction.confidence,
                request_rate = snapshot.request_rate,
                "adapted selection strategy"
            );
        }
        Some(prediction.algorithm)
    }

    /// Reset the traffic history once it is older than the configured age.
    pub fn aggregate_metrics(&self) -> bool {
        let max_age = self.config.load().metrics_reset_after;
        let reset = self.aggregator.reset_if_older_than(max_age);
        if reset {
            debug!("traffic history reset");
        }
        reset
    }

    pub fn status(&self) -> StrategyStatus {
        let config = self.config.load();
        let state = self.state.read().clone();
        StrategyStatus {
            ai_enabled: config.ai_enabled,
            current_algorithm: state.current_algorithm,
            seconds_since_last_decision: state.last_decision_at.elapsed().as_secs_f64(),
            fallback_algorithm: config.fallback_algorithm.clone(),
            min_confidence_level: config.min_confidence_level,
            metrics: self.aggregator.snapshot(),
        }
    }

    /// Spawn the adaptation and aggregation loops.
    ///
    /// Does nothing unless adaptive selection is enabled, the loops are not
    /// already running and shutdown has not been triggered. Returns true if
    /// the loops were started.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.load().ai_enabled {
            info!("adaptive selection disabled, background loops not started");
            return false;
        }

        // Checked under the lock `shutdown` takes before signalling, so the
        // receivers below always exist before the signal is sent.
        let mut tasks = self.tasks.lock();
        if self.shutdown.is_triggered() {
            warn!("orchestrator already shut down, background loops not started");
            return false;
        }
        if tasks.iter().any(|t| !t.is_finished()) {
            return false;
        }
        tasks.clear();

        tasks.push(tokio::spawn(run_periodic(
            "adaptation",
            Arc::downgrade(self),
            |config| config.adaptation_interval,
            |orchestrator| {
                orchestrator.perform_adaptation();
            },
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(run_periodic(
            "metrics aggregation",
            Arc::downgrade(self),
            |config| config.metrics_interval,
            |orchestrator| {
                orchestrator.aggregate_metrics();
            },
            self.shutdown.subscribe(),
        )));
        true
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().iter().any(|t| !t.is_finished())
    }

    /// Stop the background loops and wait for them to exit.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut tasks = self.tasks.lock();
            self.shutdown.shutdown();
            std::mem::take(&mut *tasks)
        };
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "background loop ended abnormally");
            }
        }
        info!("orchestrator stopped");
    }
}

/// Run `task` every `period_of(config)` until shutdown or until the
/// orchestrator is dropped.
///
/// The task runs on the blocking pool so a slow predictor never stalls the
/// runtime workers serving requests.
async fn run_periodic(
    name: &'static str,
    orchestrator: Weak<Orchestrator>,
    period_of: fn(&AdaptiveConfig) -> Duration,
    task: fn(&Orchestrator),
    mut shutdown: broadcast::Receiver<()>,
) {
    let Some(mut period) = orchestrator
        .upgrade()
        .map(|o| period_of(&o.config()).max(MIN_LOOP_PERIOD))
    else {
        return;
    };

    let mut ticker = new_ticker(period);
    info!(task = name, interval = ?period, "background loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(strong) = orchestrator.upgrade() else {
                    debug!(task = name, "orchestrator dropped, background loop exiting");
                    break;
                };
                if strong.shutdown.is_triggered() {
                    info!(task = name, "background loop shutting down");
                    break;
                }

                let next = period_of(&strong.config()).max(MIN_LOOP_PERIOD);
                if let Err(e) = tokio::task::spawn_blocking(move || task(&strong)).await {
                    error!(task = name, error = %e, "background task failed");
                }

                if next != period {
                    info!(task = name, interval = ?next, "background loop interval changed");
                    period = next;
                    ticker = new_ticker(period);
                }
            }

            _ = shutdown.recv() => {
                info!(task = name, "background loop shutting down");
                break;
            }
        }
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("current_algorithm", &self.current_strategy())
            .field("ai_enabled", &self.config.load().ai_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, BackendConfig, PoolConfig};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

    /// Predictor returning a fixed answer and counting calls.
    struct FixedPredictor {
        prediction: Result<Prediction, PredictorError>,
        recorded: AtomicUsize,
        analyzed: AtomicUsize,
    }

    impl FixedPredictor {
        fn new(prediction: Result<Prediction, PredictorError>) -> Arc<Self> {
            Arc::new(Self {
                prediction,
                recorded: AtomicUsize::new(0),
                analyzed: AtomicUsize::new(0),
            })
        }
    }

    impl Predictor for FixedPredictor {
        fn record_metrics(&self, _: f64, _: f64, _: f64, _: &Features) {
            self.recorded.fetch_add(1, Ordering::SeqCst);
        }

        fn predict_optimal_strategy(&self) -> Result<Prediction, PredictorError> {
            self.prediction.clone()
        }

        fn analyze_application_context(&self, _: &str, _: &str, _: &str, _: u64) -> Features {
            self.analyzed.fetch_add(1, Ordering::SeqCst);
            Features::new()
        }
    }

    fn registry() -> Arc<Registry> {
        let registry = Registry::new();
        registry
            .add_pool(&PoolConfig {
                name: "web".to_string(),
                algorithm: Algorithm::RoundRobin,
                sticky_sessions: false,
                backends: vec![BackendConfig::new("a"), BackendConfig::new("b")],
            })
            .unwrap();
        Arc::new(registry)
    }

    fn adaptive(ai_enabled: bool) -> AdaptiveConfig {
        AdaptiveConfig {
            ai_enabled,
            min_confidence_level: 0.7,
            fallback_algorithm: "round_robin".to_string(),
            ..AdaptiveConfig::default()
        }
    }

    fn plain_orchestrator() -> Orchestrator {
        Orchestrator::new(registry(), Arc::new(DisabledPredictor), adaptive(false))
    }

    fn plain_request() -> RequestContext {
        RequestContext::new("GET", "/", "", "", 0)
    }

    #[test]
    fn test_disabled_uses_fallback_without_predictor() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.99, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor.clone(), adaptive(false));

        let selection = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        assert_eq!(selection.strategy, "round_robin");
        assert_eq!(orchestrator.current_strategy(), "round_robin");
    }

    #[test]
    fn test_low_confidence_falls_back() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.3, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor, adaptive(true));

        let selection = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        assert_eq!(selection.strategy, "round_robin");
        assert_eq!(orchestrator.current_strategy(), "round_robin");
        assert_eq!(
            orchestrator
                .metrics
                .strategy_decisions(DecisionSource::Request, DecisionOutcome::Fallback),
            1
        );
    }

    #[test]
    fn test_predictor_error_falls_back() {
        let predictor =
            FixedPredictor::new(Err(PredictorError::InsufficientData { have: 1, need: 100 }));
        let mut config = adaptive(true);
        config.fallback_algorithm = "least_conn".to_string();
        let orchestrator = Orchestrator::new(registry(), predictor, config);

        let selection = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        assert_eq!(selection.strategy, "least_conn");
    }

    #[test]
    fn test_confident_prediction_is_adopted() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("ai_optimized", 0.9, 10.0)));
        let orchestrator = Orchestrator::new(registry(), predictor, adaptive(true));

        let selection = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        assert_eq!(selection.strategy, "ai_optimized");
        assert_eq!(orchestrator.current_strategy(), "ai_optimized");
    }

    #[test]
    fn test_unknown_strategy_uses_pool_algorithm() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("deep_magic", 0.95, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor, adaptive(true));

        let first = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        let second = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        // the pool is round robin
        assert_eq!(first.backend.address(), "a");
        assert_eq!(second.backend.address(), "b");
        assert_eq!(orchestrator.current_strategy(), "deep_magic");
    }

    #[test]
    fn test_registry_errors_are_not_masked() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.3, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor, adaptive(true));

        let err = orchestrator
            .select_for_pool("missing", CLIENT, None, &plain_request())
            .unwrap_err();
        assert_eq!(err, crate::backend::BalancerError::PoolNotFound("missing".to_string()));

        orchestrator.registry().update_health("web", "a", false);
        orchestrator.registry().update_health("web", "b", false);
        let err = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_unknown_pools_leave_no_trace() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.9, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor, adaptive(true));

        for i in 0..1000 {
            let pool = format!("bogus-{i}");
            let err = orchestrator
                .select_for_pool(&pool, CLIENT, None, &plain_request())
                .unwrap_err();
            assert_eq!(err, crate::backend::BalancerError::PoolNotFound(pool));
        }
        orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();

        let snapshot = orchestrator.aggregator().snapshot();
        assert_eq!(snapshot.features["pools"], serde_json::Value::from(1u64));
        assert_eq!(snapshot.features["total_requests"], serde_json::Value::from(1u64));

        let text = orchestrator.metrics.encode().unwrap();
        assert!(!text.contains("bogus"));
        assert!(text.contains("pool=\"unknown\",reason=\"pool_not_found\"} 1000"));
    }

    #[test]
    fn test_application_context_analyzed_when_enabled() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("round_robin", 0.9, 0.0)));
        let mut config = adaptive(true);
        config.application_aware = true;
        let orchestrator = Orchestrator::new(registry(), predictor.clone(), config);

        orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        assert_eq!(predictor.analyzed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_complete_releases_connection() {
        let orchestrator = plain_orchestrator();

        let selection = orchestrator
            .select_for_pool("web", CLIENT, None, &plain_request())
            .unwrap();
        assert_eq!(selection.backend.connections(), 1);

        orchestrator.complete(&selection, Duration::from_millis(20), false);
        assert_eq!(selection.backend.connections(), 0);

        let snapshot = orchestrator.aggregator().snapshot();
        assert!((snapshot.error_rate - 1.0).abs() < 1e-9);
        assert!((snapshot.avg_response_time - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_select_backend_from_request() {
        let orchestrator = plain_orchestrator().with_routes(vec![RouteConfig {
                host: String::new(),
                path_prefix: "/".to_string(),
                pool: "web".to_string(),
            }]);

        let req = Request::builder()
            .uri("/index.html")
            .header("x-forwarded-for", "203.0.113.9")
            .body(())
            .unwrap();
        let selection = orchestrator.select_backend(&req, None).unwrap();
        assert_eq!(selection.pool, "web");
    }

    #[test]
    fn test_perform_adaptation() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.8, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor.clone(), adaptive(true));

        assert_eq!(orchestrator.perform_adaptation().as_deref(), Some("least_conn"));
        assert_eq!(orchestrator.current_strategy(), "least_conn");
        assert_eq!(predictor.recorded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adaptation_keeps_strategy_on_low_confidence() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.5, 0.0)));
        let orchestrator = Orchestrator::new(registry(), predictor, adaptive(true));

        assert_eq!(orchestrator.perform_adaptation(), None);
        assert_eq!(orchestrator.current_strategy(), "round_robin");
    }

    #[test]
    fn test_update_config_and_status() {
        let orchestrator = plain_orchestrator();
        let mut config = adaptive(true);
        config.min_confidence_level = 0.9;
        orchestrator.update_config(config);

        let status = orchestrator.status();
        assert!(status.ai_enabled);
        assert_eq!(status.min_confidence_level, 0.9);
        assert_eq!(status.current_algorithm, "round_robin");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["fallback_algorithm"], "round_robin");
    }

    #[tokio::test]
    async fn test_start_requires_ai_enabled() {
        let orchestrator = Arc::new(Orchestrator::new(
            registry(),
            Arc::new(DisabledPredictor),
            adaptive(false),
        ));
        assert!(!orchestrator.start());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_loops_adapt_and_shut_down() {
        let predictor = FixedPredictor::new(Ok(Prediction::new("least_conn", 0.9, 0.0)));
        let mut config = adaptive(true);
        config.adaptation_interval = Duration::from_millis(20);
        config.metrics_interval = Duration::from_millis(20);
        let orchestrator = Arc::new(Orchestrator::new(registry(), predictor.clone(), config));

        assert!(orchestrator.start());
        assert!(!orchestrator.start());

        tokio::time::timeout(Duration::from_secs(5), async {
            while orchestrator.current_strategy() != "least_conn" {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(predictor.recorded.load(Ordering::SeqCst) >= 1);

        tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown())
            .await
            .unwrap();
        assert!(!orchestrator.is_running());
        assert!(!orchestrator.start());
    }

    #[tokio::test]
    async fn test_start_after_shutdown_spawns_nothing() {
        let orchestrator = Arc::new(Orchestrator::new(
            registry(),
            Arc::new(DisabledPredictor),
            adaptive(true),
        ));
        orchestrator.shutdown().await;

        assert!(!orchestrator.start());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_racing_shutdown_always_stops() {
        for _ in 0..100 {
            let orchestrator = Arc::new(Orchestrator::new(
                registry(),
                Arc::new(DisabledPredictor),
                adaptive(true),
            ));
            let starter = Arc::clone(&orchestrator);
            let started = tokio::task::spawn_blocking(move || starter.start());

            tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown())
                .await
                .unwrap();
            started.await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), orchestrator.shutdown())
                .await
                .unwrap();
            assert!(!orchestrator.is_running());
        }
    }
}
