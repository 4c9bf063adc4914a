//! Sticky-session bindings.

use dashmap::DashMap;

/// Per-pool session id to backend address maps, independent of any pool
/// lock.
///
/// A session id is bound separately in every sticky pool it reaches.
#[derive(Debug, Default)]
pub struct SessionStore {
    pools: DashMap<String, DashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound address for a session in the given pool.
    pub fn get(&self, pool: &str, session_id: &str) -> Option<String> {
        let sessions = self.pools.get(pool)?;
        let address = sessions.get(session_id)?.value().clone();
        Some(address)
    }

    /// Bind a session in a pool, replacing any previous binding there.
    pub fn bind(&self, pool: &str, session_id: &str, address: &str) {
        self.pools
            .entry(pool.to_string())
            .or_default()
            .insert(session_id.to_string(), address.to_string());
    }

    /// Drop a binding, but only if it still points at `address`.
    ///
    /// A concurrent request may already have rebound the session.
    pub fn purge(&self, session_id: &str, pool: &str, address: &str) -> bool {
        self.pools
            .get(pool)
            .and_then(|sessions| sessions.remove_if(session_id, |_, bound| bound == address))
            .is_some()
    }

    /// Drop every binding to a backend. Returns how many were removed.
    pub fn purge_backend(&self, pool: &str, address: &str) -> usize {
        let Some(sessions) = self.pools.get(pool) else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, bound| bound != address);
        before.saturating_sub(sessions.len())
    }

    /// Drop every binding into a pool.
    pub fn purge_pool(&self, pool: &str) -> usize {
        self.pools
            .remove(pool)
            .map(|(_, sessions)| sessions.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.pools.iter().map(|sessions| sessions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
