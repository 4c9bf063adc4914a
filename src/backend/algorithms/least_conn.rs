//! Least-connections load balancing algorithm.

use super::{LoadBalancer, SelectionContext};
use crate::backend::Backend;
use std::sync::Arc;

/// Least-connections load balancer.
///
/// Sends requests to the backend with the fewest in-flight connections.
/// Ties go to the first backend in list order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastConnections;

impl LeastConnections {
    /// Pick from a slice without needing a selection context.
    pub fn pick(backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut selected: Option<&Arc<Backend>> = None;
        let mut min_conns = u64::MAX;

        for backend in backends {
            let conns = backend.connections();
            if selected.is_none() || conns < min_conns {
                min_conns = conns;
                selected = Some(backend);
            }
        }

        selected.cloned()
    }
}

impl LoadBalancer for LeastConnections {
    fn name(&self) -> &str {
        "least_conn"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        Self::pick(backends)
    }
}
