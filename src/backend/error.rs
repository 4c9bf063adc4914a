//! Registry error types.

use thiserror::Error;

/// Errors returned by the backend registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BalancerError {
    /// Unknown pool name.
    #[error("pool '{0}' not found")]
    PoolNotFound(String),

    /// Pool has no backends configured at all.
    #[error("no backends configured in pool '{0}'")]
    NoBackendsInPool(String),

    /// Every backend in the pool is currently unhealthy.
    #[error("no healthy backends available in pool '{0}'")]
    NoHealthyBackends(String),

    /// Backend address not present in the pool.
    #[error("backend {address} not found in pool '{pool}'")]
    BackendNotFound { pool: String, address: String },

    /// Pool name already registered.
    #[error("pool '{0}' already exists")]
    PoolAlreadyExists(String),

    /// Backend address already present in the pool.
    #[error("backend {address} already exists in pool '{pool}'")]
    DuplicateBackend { pool: String, address: String },
}

impl BalancerError {
    /// Whether the caller may retry the request later.
    ///
    /// Only health exhaustion is transient; the rest are configuration or
    /// admin errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, BalancerError::NoHealthyBackends(_))
    }

    /// HTTP status a router should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            BalancerError::NoHealthyBackends(_) => 503,
            BalancerError::PoolNotFound(_) | BalancerError::NoBackendsInPool(_) => 502,
            BalancerError::BackendNotFound { .. } => 404,
            BalancerError::PoolAlreadyExists(_) | BalancerError::DuplicateBackend { .. } => 409,
        }
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            BalancerError::PoolNotFound(_) => "pool_not_found",
            BalancerError::NoBackendsInPool(_) => "no_backends",
            BalancerError::NoHealthyBackends(_) => "no_healthy_backends",
            BalancerError::BackendNotFound { .. } => "backend_not_found",
            BalancerError::PoolAlreadyExists(_) => "pool_exists",
            BalancerError::DuplicateBackend { .. } => "duplicate_backend",
        }
    }
}

/// Result type for registry operations.
pub type BalancerResult<T> = Result<T, BalancerError>;
