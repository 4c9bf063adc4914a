//! Round-robin load balancing algorithm.

use super::{LoadBalancer, SelectionContext};
use crate::backend::Backend;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Round-robin load balancer.
///
/// Cycles through the healthy subset using the pool's counter. The modulus
/// is taken over the current healthy set, so the cycle shifts when health
/// changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let idx = ctx.counter.fetch_add(1, Ordering::Relaxed) % backends.len() as u64;
        backends.get(idx as usize).cloned()
    }
}
