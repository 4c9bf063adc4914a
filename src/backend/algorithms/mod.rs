//! Load balancing algorithms.
//!
//! Each algorithm is implemented once here. The registry uses them for a
//! pool's own algorithm and the orchestrator reuses them when it picks a
//! base algorithm at runtime.

mod geo;
mod ip_hash;
mod least_conn;
mod round_robin;
mod weighted;

pub use geo::{GeoError, GeoLocator, GeoProximity};
pub use ip_hash::IpHash;
pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRandom;

use crate::backend::Backend;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Per-request inputs an algorithm may consult.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Client address, used by ip-hash and geo-proximity.
    pub client_ip: IpAddr,
    /// Round-robin position of the pool being selected from.
    pub counter: &'a AtomicU64,
}

/// Trait for load balancing algorithms.
pub trait LoadBalancer: Send + Sync {
    /// Strategy name reported in logs and metrics.
    fn name(&self) -> &str;

    /// Select a backend.
    ///
    /// # Arguments
    ///
    /// * `backends` - The healthy subset of the pool, in list order
    /// * `ctx` - Client address and pool counter
    ///
    /// # Returns
    ///
    /// The chosen backend, or None if `backends` is empty.
    fn select(&self, backends: &[Arc<Backend>], ctx: &SelectionContext<'_>) -> Option<Arc<Backend>>;
}

/// Uniform random choice, used wherever an algorithm has no better answer.
pub(crate) fn random_choice(backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
    use rand::seq::SliceRandom;
    backends.choose(&mut rand::thread_rng()).cloned()
}
