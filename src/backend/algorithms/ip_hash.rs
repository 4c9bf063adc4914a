//! IP hash load balancing algorithm.

use super::{LoadBalancer, SelectionContext};
use crate::backend::Backend;
use md5::{Digest, Md5};
use std::net::IpAddr;
use std::sync::Arc;

/// IP hash load balancer.
///
/// Routes a client to `md5(ip)[0] mod len(healthy)`. Only the first digest
/// byte is used, which buckets clients 256 ways regardless of pool size;
/// this matches the routing of existing deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpHash;

impl IpHash {
    /// The hash bucket for a client address.
    ///
    /// IPv4 addresses are hashed in their 16-byte IPv4-mapped form.
    pub fn bucket(ip: IpAddr) -> u8 {
        let octets = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Md5::digest(octets)[0]
    }
}

impl LoadBalancer for IpHash {
    fn name(&self) -> &str {
        "ip_hash"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let idx = usize::from(Self::bucket(ctx.client_ip)) % backends.len();
        backends.get(idx).cloned()
    }
}
