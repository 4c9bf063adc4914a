//! Weighted selection, historically named weighted round-robin.

use super::{LoadBalancer, SelectionContext};
use crate::backend::Backend;
use rand::Rng;
use std::sync::Arc;

/// Weighted random load balancer.
///
/// Draws a uniform integer in `[0, total_weight)` and walks the backends
/// accumulating weight until the running sum exceeds the draw. Despite the
/// `weighted_round_robin` name it answers to, the sequence is random, not a
/// deterministic cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandom;

impl WeightedRandom {
    /// Sum of normalized weights.
    pub fn total_weight(backends: &[Arc<Backend>]) -> u64 {
        backends.iter().map(|b| u64::from(b.weight())).sum()
    }

    /// Resolve a draw in `[0, total_weight)` to a backend.
    pub fn pick(backends: &[Arc<Backend>], draw: u64) -> Option<Arc<Backend>> {
        let mut cumulative = 0u64;
        for backend in backends {
            cumulative += u64::from(backend.weight());
            if cumulative > draw {
                return Some(Arc::clone(backend));
            }
        }
        backends.first().cloned()
    }
}

impl LoadBalancer for WeightedRandom {
    fn name(&self) -> &str {
        "weighted_round_robin"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        _ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        let total = Self::total_weight(backends);
        if total == 0 {
            return None;
        }

        let draw = rand::thread_rng().gen_range(0..total);
        Self::pick(backends, draw)
    }
}
