//! Geo-proximity selection.

use super::{LoadBalancer, SelectionContext, random_choice};
use crate::backend::Backend;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors from a geolocation collaborator.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation is not enabled")]
    Disabled,

    #[error("no location known for client {0}")]
    UnknownClient(IpAddr),

    #[error("geolocation lookup failed: {0}")]
    Lookup(String),
}

/// Finds the backend closest to a client.
///
/// Distance computation lives outside this crate; only the answer is used.
pub trait GeoLocator: Send + Sync {
    /// Return the address, among `candidates`, nearest to `client_ip`.
    fn find_closest_backend(
        &self,
        client_ip: IpAddr,
        candidates: &[String],
    ) -> Result<String, GeoError>;
}

/// Delegates to a [`GeoLocator`], falling back to a uniform random choice
/// when there is no locator, it errors, or it names a non-candidate.
#[derive(Clone, Default)]
pub struct GeoProximity {
    locator: Option<Arc<dyn GeoLocator>>,
}

impl GeoProximity {
    pub fn new(locator: Option<Arc<dyn GeoLocator>>) -> Self {
        Self { locator }
    }

    fn closest(&self, backends: &[Arc<Backend>], client_ip: IpAddr) -> Option<Arc<Backend>> {
        let locator = self.locator.as_ref()?;
        let candidates: Vec<String> = backends.iter().map(|b| b.address().to_string()).collect();

        match locator.find_closest_backend(client_ip, &candidates) {
            Ok(address) => backends.iter().find(|b| b.address() == address).cloned(),
            Err(e) => {
                debug!(client = %client_ip, error = %e, "geo lookup failed, choosing at random");
                None
            }
        }
    }
}

impl std::fmt::Debug for GeoProximity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoProximity")
            .field("locator", &self.locator.is_some())
            .finish()
    }
}

impl LoadBalancer for GeoProximity {
    fn name(&self) -> &str {
        "geo_proximity"
    }

    fn select(
        &self,
        backends: &[Arc<Backend>],
        ctx: &SelectionContext<'_>,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        self.closest(backends, ctx.client_ip)
            .or_else(|| random_choice(backends))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::algorithms::test_support::backends;
    use std::sync::atomic::AtomicU64;

    struct Fixed(Result<&'static str, ()>);

    impl GeoLocator for Fixed {
        fn find_closest_backend(
            &self,
            client_ip: IpAddr,
            _candidates: &[String],
        ) -> Result<String, GeoError> {
            self.0
                .map(str::to_string)
                .map_err(|_| GeoError::UnknownClient(client_ip))
        }
    }

    fn select_with(geo: &GeoProximity, servers: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let counter = AtomicU64::new(0);
        let ctx = SelectionContext {
            client_ip: "8.8.8.8".parse().unwrap(),
            counter: &counter,
        };
        geo.select(servers, &ctx)
    }

    #[test]
    fn test_uses_locator_answer() {
        let servers = backends(&[("a", 1), ("b", 1)]);
        let geo = GeoProximity::new(Some(Arc::new(Fixed(Ok("b")))));
        for _ in 0..20 {
            assert_eq!(select_with(&geo, &servers).unwrap().address(), "b");
        }
    }

    #[test]
    fn test_falls_back_on_error_or_stranger() {
        let servers = backends(&[("a", 1), ("b", 1)]);

        let failing = GeoProximity::new(Some(Arc::new(Fixed(Err(())))));
        assert!(select_with(&failing, &servers).is_some());

        let stranger = GeoProximity::new(Some(Arc::new(Fixed(Ok("zzz")))));
        let picked = select_with(&stranger, &servers).unwrap();
        assert!(picked.address() == "a" || picked.address() == "b");

        let none = GeoProximity::default();
        assert!(select_with(&none, &servers).is_some());
    }

    #[test]
    fn test_empty() {
        assert!(select_with(&GeoProximity::default(), &[]).is_none());
    }
}
