//! Backend/pool registry and backend selection.

use crate::backend::algorithms::{
    GeoLocator, GeoProximity, IpHash, LeastConnections, LoadBalancer, RoundRobin,
    SelectionContext, WeightedRandom,
};
use crate::backend::error::{BalancerError, BalancerResult};
use crate::backend::sessions::SessionStore;
use crate::backend::{Backend, BackendStatus, Pool};
use crate::config::{Algorithm, BackendConfig, PoolConfig};
use crate::metrics::MetricsCollector;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pool label for selections against a pool that does not exist.
pub const UNKNOWN_POOL_LABEL: &str = "unknown";

/// Owns every pool, their backends and the sticky-session map.
///
/// Pools are looked up through a sharded map and cloned out as `Arc`s, so
/// selection never holds a map shard while it runs. Sticky bindings live
/// in their own map and never take a pool lock.
pub struct Registry {
    pools: DashMap<String, Arc<Pool>>,
    sessions: SessionStore,
    geo: GeoProximity,
    metrics: MetricsCollector,
}

impl Registry {
    /// Create an empty registry without a geolocation collaborator.
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            sessions: SessionStore::new(),
            geo: GeoProximity::default(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Build a registry holding the configured pools.
    pub fn from_config(pools: &[PoolConfig]) -> BalancerResult<Self> {
        let registry = Self::new();
        for pool in pools {
            registry.add_pool(pool)?;
        }
        Ok(registry)
    }

    /// Use `locator` for geo-proximity pools.
    pub fn with_geo_locator(mut self, locator: Arc<dyn GeoLocator>) -> Self {
        self.geo = GeoProximity::new(Some(locator));
        self
    }

    /// Report into an existing metrics collector.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// The shared implementation of a pool algorithm.
    pub fn balancer(&self, algorithm: Algorithm) -> &dyn LoadBalancer {
        match algorithm {
            Algorithm::RoundRobin => &RoundRobin,
            Algorithm::LeastConn => &LeastConnections,
            Algorithm::IpHash => &IpHash,
            Algorithm::WeightedRoundRobin => &WeightedRandom,
            Algorithm::GeoProximity => &self.geo,
        }
    }

    /// Register a pool. Pool names are unique.
    pub fn add_pool(&self, config: &PoolConfig) -> BalancerResult<()> {
        match self.pools.entry(config.name.clone()) {
            Entry::Occupied(_) => Err(BalancerError::PoolAlreadyExists(config.name.clone())),
            Entry::Vacant(slot) => {
                let pool = Pool::new(config);
                for backend in pool.backends() {
                    self.metrics.set_backend_health(pool.name(), backend.address(), true);
                }
                info!(
                    pool = %config.name,
                    algorithm = %config.algorithm,
                    sticky = config.sticky_sessions,
                    backends = pool.len(),
                    "pool added"
                );
                slot.insert(Arc::new(pool));
                Ok(())
            }
        }
    }

    /// Remove a pool, its backend gauges and every sticky binding into it.
    pub fn remove_pool(&self, name: &str) -> BalancerResult<()> {
        let (_, pool) = self
            .pools
            .remove(name)
            .ok_or_else(|| BalancerError::PoolNotFound(name.to_string()))?;
        for backend in pool.backends() {
            self.metrics.remove_backend(name, backend.address());
        }
        let purged = self.sessions.purge_pool(name);
        info!(pool = %name, purged_sessions = purged, "pool removed");
        Ok(())
    }

    pub fn pool(&self, name: &str) -> Option<Arc<Pool>> {
        self.pools.get(name).map(|p| Arc::clone(p.value()))
    }

    fn require_pool(&self, name: &str) -> BalancerResult<Arc<Pool>> {
        self.pool(name)
            .ok_or_else(|| BalancerError::PoolNotFound(name.to_string()))
    }

    /// Configuration view of every pool, sorted by name.
    pub fn get_pools(&self) -> Vec<PoolConfig> {
        let mut pools: Vec<PoolConfig> = self.pools.iter().map(|p| p.config()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        pools
    }

    pub fn get_pool(&self, name: &str) -> Option<PoolConfig> {
        self.pool(name).map(|p| p.config())
    }

    /// Live state of every backend in a pool.
    pub fn pool_status(&self, name: &str) -> Option<Vec<BackendStatus>> {
        self.pool(name)
            .map(|p| p.backends().iter().map(|b| b.status()).collect())
    }

    pub fn add_backend(&self, pool: &str, config: &BackendConfig) -> BalancerResult<()> {
        let pool = self.require_pool(pool)?;
        let backend = pool.add_backend(config)?;
        self.metrics.set_backend_health(pool.name(), backend.address(), true);
        info!(
            pool = %pool.name(),
            backend = %backend.address(),
            weight = backend.weight(),
            "backend added"
        );
        Ok(())
    }

    /// Remove a backend and purge sessions bound to it.
    pub fn remove_backend(&self, pool: &str, address: &str) -> BalancerResult<()> {
        let pool = self.require_pool(pool)?;
        pool.remove_backend(address)?;
        self.metrics.remove_backend(pool.name(), address);
        let purged = self.sessions.purge_backend(pool.name(), address);
        info!(
            pool = %pool.name(),
            backend = %address,
            purged_sessions = purged,
            "backend removed"
        );
        Ok(())
    }

    /// Set a backend's health. Unknown pools or backends are ignored.
    pub fn update_health(&self, pool: &str, address: &str, healthy: bool) {
        let Some(backend) = self.pool(pool).and_then(|p| p.find(address)) else {
            return;
        };

        let previous = backend.set_healthy(healthy);
        self.metrics.set_backend_health(pool, address, healthy);
        if previous != healthy {
            if healthy {
                info!(pool = %pool, backend = %address, "backend marked healthy");
            } else {
                warn!(pool = %pool, backend = %address, "backend marked unhealthy");
            }
        }
    }

    /// Bump a backend's connection count. Unknown backends are ignored.
    pub fn increment_connections(&self, pool: &str, address: &str) {
        if let Some(backend) = self.pool(pool).and_then(|p| p.find(address)) {
            let count = backend.increment_connections();
            self.metrics.set_active_connections(pool, address, count);
        }
    }

    /// Drop a backend's connection count, never below zero.
    pub fn decrement_connections(&self, pool: &str, address: &str) {
        if let Some(backend) = self.pool(pool).and_then(|p| p.find(address)) {
            let count = backend.decrement_connections();
            self.metrics.set_active_connections(pool, address, count);
        }
    }

    /// Select a backend using the pool's own algorithm.
    pub fn select_backend(
        &self,
        pool: &str,
        client_ip: IpAddr,
        session_id: Option<&str>,
    ) -> BalancerResult<Arc<Backend>> {
        let algorithm = self
            .require_pool(pool)
            .map_err(|e| self.record_failure(pool, e))?
            .algorithm();
        self.select_backend_with(pool, self.balancer(algorithm), client_ip, session_id)
    }

    /// Select a backend using a specific pool algorithm.
    pub fn select_backend_with_algorithm(
        &self,
        pool: &str,
        algorithm: Algorithm,
        client_ip: IpAddr,
        session_id: Option<&str>,
    ) -> BalancerResult<Arc<Backend>> {
        self.select_backend_with(pool, self.balancer(algorithm), client_ip, session_id)
    }

    /// Select a backend with an arbitrary algorithm.
    ///
    /// Filters to healthy backends, honours a valid sticky binding, runs
    /// `balancer`, binds the session and records the selection on the
    /// chosen backend.
    pub fn select_backend_with(
        &self,
        pool_name: &str,
        balancer: &dyn LoadBalancer,
        client_ip: IpAddr,
        session_id: Option<&str>,
    ) -> BalancerResult<Arc<Backend>> {
        self.select_inner(pool_name, balancer, client_ip, session_id)
            .map_err(|e| self.record_failure(pool_name, e))
    }

    /// Count a failed selection. Unknown pool names share one label.
    fn record_failure(&self, pool_name: &str, error: BalancerError) -> BalancerError {
        let label = match &error {
            BalancerError::PoolNotFound(_) => UNKNOWN_POOL_LABEL,
            _ => pool_name,
        };
        self.metrics.record_selection_error(label, error.reason());
        error
    }

    fn select_inner(
        &self,
        pool_name: &str,
        balancer: &dyn LoadBalancer,
        client_ip: IpAddr,
        session_id: Option<&str>,
    ) -> BalancerResult<Arc<Backend>> {
        let pool = self.require_pool(pool_name)?;

        let (healthy, total) = pool.healthy();
        if total == 0 {
            warn!(pool = %pool_name, "no backends configured for pool");
            return Err(BalancerError::NoBackendsInPool(pool_name.to_string()));
        }
        if healthy.is_empty() {
            warn!(pool = %pool_name, backends = total, "no healthy backends available");
            return Err(BalancerError::NoHealthyBackends(pool_name.to_string()));
        }

        let session_id = session_id.filter(|s| !s.is_empty() && pool.sticky_sessions());

        if let Some(session) = session_id {
            if let Some(backend) = self.sticky_backend(&pool, &healthy, session) {
                self.commit(&pool, &backend, "sticky");
                return Ok(backend);
            }
        }

        let ctx = SelectionContext {
            client_ip,
            counter: pool.counter(),
        };
        let backend = balancer
            .select(&healthy, &ctx)
            .ok_or_else(|| BalancerError::NoHealthyBackends(pool_name.to_string()))?;

        if let Some(session) = session_id {
            self.sessions.bind(pool_name, session, backend.address());
        }

        self.commit(&pool, &backend, balancer.name());
        Ok(backend)
    }

    /// A still-valid sticky backend, purging the binding if it went stale.
    fn sticky_backend(
        &self,
        pool: &Pool,
        healthy: &[Arc<Backend>],
        session: &str,
    ) -> Option<Arc<Backend>> {
        let address = self.sessions.get(pool.name(), session)?;
        match healthy.iter().find(|b| b.address() == address) {
            Some(backend) => Some(Arc::clone(backend)),
            None => {
                self.sessions.purge(session, pool.name(), &address);
                debug!(pool = %pool.name(), backend = %address, "purged stale sticky binding");
                None
            }
        }
    }

    fn commit(&self, pool: &Pool, backend: &Backend, strategy: &str) {
        let count = backend.increment_connections();
        backend.touch();
        self.metrics.set_active_connections(pool.name(), backend.address(), count);
        self.metrics.record_selection(pool.name(), backend.address(), strategy);
        debug!(
            pool = %pool.name(),
            backend = %backend.address(),
            strategy = %strategy,
            connections = count,
            "selected backend"
        );
    }

    /// Number of live sticky bindings.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pool_config(name: &str, algorithm: Algorithm, sticky: bool, addrs: &[&str]) -> PoolConfig {
        PoolConfig {
            name: name.to_string(),
            algorithm,
            sticky_sessions: sticky,
            backends: addrs.iter().map(|a| BackendConfig::new(*a)).collect(),
        }
    }

    fn single_pool(name: &str, algorithm: Algorithm, sticky: bool, addrs: &[&str]) -> Registry {
        Registry::from_config(&[pool_config(name, algorithm, sticky, addrs)]).unwrap()
    }

    fn client() -> IpAddr {
        "192.168.1.1".parse().unwrap()
    }

    #[test]
    fn test_round_robin_selection() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a", "b"]);

        let s1 = registry.select_backend("web", client(), None).unwrap();
        let s2 = registry.select_backend("web", client(), None).unwrap();
        let s3 = registry.select_backend("web", client(), None).unwrap();

        assert_ne!(s1.address(), s2.address());
        assert_eq!(s1.address(), s3.address()); // Back to first backend
    }

    #[test]
    fn test_selection_records_load() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a"]);

        let backend = registry.select_backend("web", client(), None).unwrap();
        assert_eq!(backend.connections(), 1);
        assert!(backend.last_used().is_some());

        registry.decrement_connections("web", "a");
        assert_eq!(backend.connections(), 0);
    }

    #[test]
    fn test_nonexistent_pool() {
        let registry = Registry::new();
        let err = registry.select_backend("nonexistent", client(), None).unwrap_err();
        assert_eq!(err, BalancerError::PoolNotFound("nonexistent".to_string()));
    }

    #[test]
    fn test_empty_pool() {
        let registry = single_pool("empty", Algorithm::RoundRobin, false, &[]);
        let err = registry.select_backend("empty", client(), None).unwrap_err();
        assert!(matches!(err, BalancerError::NoBackendsInPool(_)));
    }

    #[test]
    fn test_all_unhealthy() {
        let registry = single_pool("x", Algorithm::RoundRobin, false, &["a", "b"]);
        registry.update_health("x", "a", false);
        registry.update_health("x", "b", false);

        for _ in 0..10 {
            let err = registry.select_backend("x", client(), None).unwrap_err();
            assert!(matches!(err, BalancerError::NoHealthyBackends(_)));
        }
    }

    #[test]
    fn test_unhealthy_never_selected() {
        for algorithm in Algorithm::ALL {
            let registry = single_pool("p", algorithm, false, &["a", "b", "c"]);
            registry.update_health("p", "b", false);

            for i in 0..200u32 {
                let ip: IpAddr = format!("10.0.{}.{}", i / 250, i % 250).parse().unwrap();
                let backend = registry.select_backend("p", ip, None).unwrap();
                assert_ne!(backend.address(), "b", "algorithm {algorithm}");
            }
        }
    }

    #[test]
    fn test_least_connections_selection() {
        let registry = single_pool("lc", Algorithm::LeastConn, false, &["a", "b"]);

        registry.increment_connections("lc", "a");
        registry.increment_connections("lc", "a");

        let selected = registry.select_backend("lc", client(), None).unwrap();
        assert_eq!(selected.address(), "b");
    }

    #[test]
    fn test_ip_hash_consistency() {
        let registry = single_pool("iph", Algorithm::IpHash, false, &["a", "b"]);

        let s1 = registry.select_backend("iph", client(), None).unwrap();
        let s2 = registry.select_backend("iph", client(), None).unwrap();
        assert_eq!(s1.address(), s2.address());
    }

    #[test]
    fn test_sticky_session() {
        let registry = single_pool("web", Algorithm::RoundRobin, true, &["a", "b"]);

        let first = registry.select_backend("web", client(), Some("s1")).unwrap();
        for _ in 0..5 {
            let again = registry.select_backend("web", client(), Some("s1")).unwrap();
            assert_eq!(first.address(), again.address());
        }
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_sticky_session_spans_pools() {
        let registry = Registry::from_config(&[
            pool_config("web", Algorithm::RoundRobin, true, &["w1", "w2"]),
            pool_config("api", Algorithm::RoundRobin, true, &["a1", "a2"]),
        ])
        .unwrap();

        let web = registry.select_backend("web", client(), Some("s1")).unwrap();
        let api = registry.select_backend("api", client(), Some("s1")).unwrap();
        for _ in 0..3 {
            let web_again = registry.select_backend("web", client(), Some("s1")).unwrap();
            let api_again = registry.select_backend("api", client(), Some("s1")).unwrap();
            assert_eq!(web.address(), web_again.address());
            assert_eq!(api.address(), api_again.address());
        }
        assert_eq!(registry.session_count(), 2);

        registry.remove_pool("api").unwrap();
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_sticky_ignored_when_disabled() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a", "b"]);

        let first = registry.select_backend("web", client(), Some("s1")).unwrap();
        let second = registry.select_backend("web", client(), Some("s1")).unwrap();
        assert_ne!(first.address(), second.address());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_stale_sticky_binding_is_replaced() {
        let registry = single_pool("web", Algorithm::RoundRobin, true, &["a", "b"]);

        let first = registry.select_backend("web", client(), Some("s1")).unwrap();
        registry.update_health("web", first.address(), false);

        let second = registry.select_backend("web", client(), Some("s1")).unwrap();
        assert_ne!(first.address(), second.address());

        // Recovery does not revive the old binding
        registry.update_health("web", first.address(), true);
        let third = registry.select_backend("web", client(), Some("s1")).unwrap();
        assert_eq!(second.address(), third.address());
    }

    #[test]
    fn test_remove_backend_purges_sessions() {
        let registry = single_pool("web", Algorithm::RoundRobin, true, &["a", "b"]);

        let first = registry.select_backend("web", client(), Some("s1")).unwrap();
        registry.remove_backend("web", first.address()).unwrap();
        assert_eq!(registry.session_count(), 0);

        let err = registry.remove_backend("web", first.address()).unwrap_err();
        assert!(matches!(err, BalancerError::BackendNotFound { .. }));
    }

    #[test]
    fn test_unknown_pool_errors_share_one_label() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a"]);
        for i in 0..50 {
            let pool = format!("bogus-{i}");
            assert!(registry.select_backend(&pool, client(), None).is_err());
            assert!(
                registry
                    .select_backend_with_algorithm(&pool, Algorithm::LeastConn, client(), None)
                    .is_err()
            );
        }

        let text = registry.metrics().encode().unwrap();
        assert!(!text.contains("bogus"));
        assert!(text.contains(
            "tidelb_selection_errors_total{pool=\"unknown\",reason=\"pool_not_found\"} 100"
        ));
    }

    #[test]
    fn test_removed_backends_leave_no_gauges() {
        let registry = Registry::from_config(&[
            pool_config("web", Algorithm::RoundRobin, false, &["a", "b"]),
            pool_config("api", Algorithm::RoundRobin, false, &["c"]),
        ])
        .unwrap();
        registry.select_backend("web", client(), None).unwrap();
        registry.select_backend("api", client(), None).unwrap();

        registry.remove_backend("web", "a").unwrap();
        registry.remove_pool("api").unwrap();

        let text = registry.metrics().encode().unwrap();
        assert!(!text.contains("tidelb_backend_health{pool=\"web\",backend=\"a\"}"));
        assert!(!text.contains("tidelb_active_connections{pool=\"web\",backend=\"a\"}"));
        assert!(!text.contains("tidelb_backend_health{pool=\"api\""));
        assert!(!text.contains("tidelb_active_connections{pool=\"api\""));
        assert!(text.contains("tidelb_backend_health{pool=\"web\",backend=\"b\"} 1"));
    }

    #[test]
    fn test_pool_names_unique() {
        let registry = Registry::new();
        registry
            .add_pool(&pool_config("web", Algorithm::RoundRobin, false, &["a"]))
            .unwrap();
        let err = registry
            .add_pool(&pool_config("web", Algorithm::LeastConn, false, &["b"]))
            .unwrap_err();
        assert_eq!(err, BalancerError::PoolAlreadyExists("web".to_string()));
        assert_eq!(registry.get_pool("web").unwrap().algorithm, Algorithm::RoundRobin);
    }

    #[test]
    fn test_remove_pool() {
        let registry = single_pool("web", Algorithm::RoundRobin, true, &["a"]);
        registry.select_backend("web", client(), Some("s1")).unwrap();

        registry.remove_pool("web").unwrap();
        assert!(registry.get_pool("web").is_none());
        assert_eq!(registry.session_count(), 0);
        assert!(matches!(registry.remove_pool("web"), Err(BalancerError::PoolNotFound(_))));
    }

    #[test]
    fn test_admin_mutators_ignore_unknown() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a"]);
        registry.update_health("nope", "a", false);
        registry.update_health("web", "zzz", false);
        registry.increment_connections("web", "zzz");
        registry.decrement_connections("nope", "a");

        let status = registry.pool_status("web").unwrap();
        assert!(status[0].healthy);
        assert_eq!(status[0].connections, 0);
    }

    #[test]
    fn test_add_backend_joins_rotation() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a"]);
        registry.add_backend("web", &BackendConfig::new("b").with_weight(3)).unwrap();
        assert!(matches!(
            registry.add_backend("web", &BackendConfig::new("b")),
            Err(BalancerError::DuplicateBackend { .. })
        ));

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..4 {
            let b = registry.select_backend("web", client(), None).unwrap();
            *counts.entry(b.address().to_string()).or_default() += 1;
        }
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 2);
    }

    #[test]
    fn test_explicit_algorithm_overrides_pool() {
        let registry = single_pool("web", Algorithm::RoundRobin, false, &["a", "b"]);
        registry.increment_connections("web", "a");

        for _ in 0..3 {
            let b = registry
                .select_backend_with_algorithm("web", Algorithm::LeastConn, client(), None)
                .unwrap();
            assert_eq!(b.address(), "b");
            registry.decrement_connections("web", "b");
        }
    }

    #[test]
    fn test_get_pools_sorted() {
        let registry = Registry::from_config(&[
            pool_config("zeta", Algorithm::RoundRobin, false, &["a"]),
            pool_config("alpha", Algorithm::IpHash, true, &["b"]),
        ])
        .unwrap();

        let names: Vec<String> = registry.get_pools().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
