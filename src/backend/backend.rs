//! Backend runtime state.

use crate::config::BackendConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single upstream target.
///
/// Address, weight and region are fixed at creation. Health, connection
/// count and last-used time are atomics so the selection path never takes
/// the pool lock to read or bump them.
#[derive(Debug)]
pub struct Backend {
    address: String,
    /// Normalized weight, always >= 1.
    weight: u32,
    region: Option<String>,
    healthy: AtomicBool,
    connections: AtomicU64,
    /// Unix milliseconds of the last selection, 0 if never selected.
    last_used: AtomicU64,
}

impl Backend {
    /// Create a healthy backend from configuration.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            address: config.address.clone(),
            weight: normalize_weight(config.weight),
            region: config.region.clone(),
            healthy: AtomicBool::new(true),
            connections: AtomicU64::new(0),
            last_used: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set health, returning the previous value.
    pub(crate) fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    /// Current in-flight connection count.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_connections(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement without going below zero.
    pub(crate) fn decrement_connections(&self) -> u64 {
        match self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    /// Time of the most recent selection.
    pub fn last_used(&self) -> Option<SystemTime> {
        match self.last_used.load(Ordering::Relaxed) {
            0 => None,
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis)),
        }
    }

    /// Whether the backend was selected within `window` of now.
    pub fn used_within(&self, window: Duration) -> bool {
        self.last_used()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .is_some_and(|elapsed| elapsed < window)
    }

    pub(crate) fn touch(&self) {
        self.last_used.store(now_millis(), Ordering::Relaxed);
    }

    /// Configuration view of this backend.
    pub fn config(&self) -> BackendConfig {
        BackendConfig {
            address: self.address.clone(),
            weight: i64::from(self.weight),
            region: self.region.clone(),
        }
    }

    /// Point-in-time view of this backend's state.
    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            address: self.address.clone(),
            weight: self.weight,
            region: self.region.clone(),
            healthy: self.is_healthy(),
            connections: self.connections(),
            last_used_ms: match self.last_used.load(Ordering::Relaxed) {
                0 => None,
                millis => Some(millis),
            },
        }
    }
}

/// Serializable backend state for admin views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub address: String,
    pub weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub healthy: bool,
    pub connections: u64,
    /// Unix milliseconds of the last selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_ms: Option<u64>,
}

/// Weights of zero or below count as 1.
pub fn normalize_weight(weight: i64) -> u32 {
    if weight <= 0 {
        1
    } else {
        u32::try_from(weight).unwrap_or(u32::MAX)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
