//! Backend pools.

use crate::backend::Backend;
use crate::backend::error::{BalancerError, BalancerResult};
use crate::config::{Algorithm, BackendConfig, PoolConfig};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// A named set of backends sharing one selection algorithm.
#[derive(Debug)]
pub struct Pool {
    name: String,
    algorithm: Algorithm,
    sticky_sessions: bool,
    /// Guarded for structural changes; iteration takes the read lock.
    backends: RwLock<Vec<Arc<Backend>>>,
    /// Round-robin position, shared by every strategy that cycles this pool.
    counter: AtomicU64,
}

impl Pool {
    /// Build a pool from configuration.
    ///
    /// Later duplicates of an address are dropped so addresses stay unique.
    pub fn new(config: &PoolConfig) -> Self {
        let mut backends: Vec<Arc<Backend>> = Vec::with_capacity(config.backends.len());
        for backend in &config.backends {
            if backends.iter().any(|b| b.address() == backend.address) {
                tracing::warn!(
                    pool = %config.name,
                    backend = %backend.address,
                    "ignoring duplicate backend address"
                );
                continue;
            }
            backends.push(Arc::new(Backend::new(backend)));
        }

        Self {
            name: config.name.clone(),
            algorithm: config.algorithm,
            sticky_sessions: config.sticky_sessions,
            backends: RwLock::new(backends),
            counter: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn sticky_sessions(&self) -> bool {
        self.sticky_sessions
    }

    pub(crate) fn counter(&self) -> &AtomicU64 {
        &self.counter
    }

    /// Number of configured backends, healthy or not.
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// All backends in list order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().clone()
    }

    /// Healthy backends in list order, plus the configured total.
    pub fn healthy(&self) -> (Vec<Arc<Backend>>, usize) {
        let backends = self.backends.read();
        let healthy = backends
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect();
        (healthy, backends.len())
    }

    /// Look up a backend by address.
    pub fn find(&self, address: &str) -> Option<Arc<Backend>> {
        self.backends
            .read()
            .iter()
            .find(|b| b.address() == address)
            .cloned()
    }

    pub fn add_backend(&self, config: &BackendConfig) -> BalancerResult<Arc<Backend>> {
        let mut backends = self.backends.write();
        if backends.iter().any(|b| b.address() == config.address) {
            return Err(BalancerError::DuplicateBackend {
                pool: self.name.clone(),
                address: config.address.clone(),
            });
        }

        let backend = Arc::new(Backend::new(config));
        backends.push(Arc::clone(&backend));
        Ok(backend)
    }

    pub fn remove_backend(&self, address: &str) -> BalancerResult<Arc<Backend>> {
        let mut backends = self.backends.write();
        let idx = backends
            .iter()
            .position(|b| b.address() == address)
            .ok_or_else(|| BalancerError::BackendNotFound {
                pool: self.name.clone(),
                address: address.to_string(),
            })?;
        Ok(backends.remove(idx))
    }

    /// Configuration view of the live pool.
    pub fn config(&self) -> PoolConfig {
        PoolConfig {
            name: self.name.clone(),
            algorithm: self.algorithm,
            sticky_sessions: self.sticky_sessions,
            backends: self.backends.read().iter().map(|b| b.config()).collect(),
        }
    }
}
