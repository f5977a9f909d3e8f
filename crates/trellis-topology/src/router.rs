//! Router entities and connectivity bookkeeping

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use trellis_core::{ControlChannel, RouterId};

/// A router participating in the fabric
///
/// Created when the router authenticates to the controller. The connectivity
/// flag is mutated only by [`RouterRegistry::mark_connected`] and
/// [`RouterRegistry::mark_disconnected`].
pub struct Router {
    pub id: RouterId,
    pub fingerprint: String,
    /// Address other routers can dial to reach this one. Empty when the
    /// router does not accept inbound links.
    pub advertised_listener: String,
    /// Weight added to a path's cost when this router is entered as a hop.
    pub cost_factor: i64,
    /// Routers flagged here carry traffic only as path endpoints, never as
    /// transit hops.
    pub no_traversal: bool,
    connected: AtomicBool,
    control: Option<Arc<dyn ControlChannel>>,
}

impl Router {
    pub fn new(
        id: impl Into<RouterId>,
        fingerprint: impl Into<String>,
        advertised_listener: impl Into<String>,
        control: Option<Arc<dyn ControlChannel>>,
    ) -> Self {
        Self {
            id: id.into(),
            fingerprint: fingerprint.into(),
            advertised_listener: advertised_listener.into(),
            cost_factor: 1,
            no_traversal: false,
            connected: AtomicBool::new(false),
            control,
        }
    }

    pub fn with_cost_factor(mut self, cost_factor: i64) -> Self {
        self.cost_factor = cost_factor;
        self
    }

    pub fn with_no_traversal(mut self, no_traversal: bool) -> Self {
        self.no_traversal = no_traversal;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn control(&self) -> Option<&Arc<dyn ControlChannel>> {
        self.control.as_ref()
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("cost_factor", &self.cost_factor)
            .field("no_traversal", &self.no_traversal)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Registry of known and connected routers
#[derive(Default)]
pub struct RouterRegistry {
    known: DashMap<RouterId, Arc<Router>>,
    connected: DashMap<RouterId, Arc<Router>>,
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the router as connected and cache it.
    pub fn mark_connected(&self, router: Arc<Router>) {
        router.set_connected(true);
        self.known.insert(router.id.clone(), router.clone());
        self.connected.insert(router.id.clone(), router);
    }

    /// Record the router as disconnected. The known cache keeps the entry
    /// so reconnects reuse the identity.
    pub fn mark_disconnected(&self, router: &Router) {
        router.set_connected(false);
        self.connected.remove(&router.id);
    }

    pub fn is_connected(&self, id: &RouterId) -> bool {
        self.connected.contains_key(id)
    }

    pub fn get_connected(&self, id: &RouterId) -> Option<Arc<Router>> {
        self.connected.get(id).map(|r| r.value().clone())
    }

    pub fn all_connected(&self) -> Vec<Arc<Router>> {
        self.connected.iter().map(|r| r.value().clone()).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn get(&self, id: &RouterId) -> Option<Arc<Router>> {
        self.known.get(id).map(|r| r.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(id: &str) -> Arc<Router> {
        Arc::new(Router::new(id, "", "tcp:0.0.0.0:0", None))
    }

    #[test]
    fn connect_disconnect_round_trip() {
        let registry = RouterRegistry::new();
        let r = router("r0");

        registry.mark_connected(r.clone());
        assert!(registry.is_connected(&r.id));
        assert!(r.is_connected());
        assert_eq!(registry.connected_count(), 1);

        registry.mark_disconnected(&r);
        assert!(!registry.is_connected(&r.id));
        assert!(!r.is_connected());
        assert_eq!(registry.connected_count(), 0);

        // still known after disconnect
        assert!(registry.get(&r.id).is_some());
        assert!(registry.get_connected(&r.id).is_none());
    }
}
