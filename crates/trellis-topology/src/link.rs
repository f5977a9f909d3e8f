//! Link entities with timestamped state histories

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trellis_core::LinkId;

use crate::router::Router;

/// Lifecycle modes of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMode {
    /// Dial proposed, not yet established.
    Pending,
    Connected,
    Failed,
    Closed,
}

/// One entry of a link's state history
#[derive(Debug, Clone, Copy)]
pub struct LinkState {
    pub mode: LinkMode,
    pub timestamp: DateTime<Utc>,
}

impl LinkState {
    pub fn new(mode: LinkMode) -> Self {
        Self {
            mode,
            timestamp: Utc::now(),
        }
    }
}

/// A control/data connection between two routers
///
/// Latencies are measured per direction and updated from router metrics
/// without taking the state lock. The current mode is derived from the most
/// recent state history entry.
pub struct Link {
    pub id: LinkId,
    pub src: Arc<Router>,
    pub dst: Arc<Router>,
    pub static_cost: i64,
    src_latency: AtomicI64,
    dst_latency: AtomicI64,
    down: AtomicBool,
    states: RwLock<Vec<LinkState>>,
}

impl Link {
    pub fn new(id: impl Into<LinkId>, src: Arc<Router>, dst: Arc<Router>) -> Self {
        Self {
            id: id.into(),
            src,
            dst,
            static_cost: 1,
            src_latency: AtomicI64::new(0),
            dst_latency: AtomicI64::new(0),
            down: AtomicBool::new(false),
            states: RwLock::new(vec![LinkState::new(LinkMode::Pending)]),
        }
    }

    pub fn with_static_cost(mut self, cost: i64) -> Self {
        self.static_cost = cost;
        self
    }

    /// Append a state; most recent wins.
    pub fn add_state(&self, state: LinkState) {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(state);
    }

    pub fn current_state(&self) -> LinkState {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        *states.last().expect("link state history is never empty")
    }

    pub fn current_mode(&self) -> LinkMode {
        self.current_state().mode
    }

    /// Connected and not administratively down.
    pub fn is_usable(&self) -> bool {
        self.current_mode() == LinkMode::Connected && !self.is_down()
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Release);
    }

    pub fn src_latency(&self) -> i64 {
        self.src_latency.load(Ordering::Relaxed)
    }

    pub fn set_src_latency(&self, latency: i64) {
        self.src_latency.store(latency, Ordering::Relaxed);
    }

    pub fn dst_latency(&self) -> i64 {
        self.dst_latency.load(Ordering::Relaxed)
    }

    pub fn set_dst_latency(&self, latency: i64) {
        self.dst_latency.store(latency, Ordering::Relaxed);
    }

    /// The metric used for link selection between a router pair.
    pub fn latency_metric(&self) -> i64 {
        self.src_latency() + self.dst_latency()
    }

    /// True if this link directly joins `a` and `b` in either orientation.
    pub fn joins(&self, a: &Router, b: &Router) -> bool {
        (self.src.id == a.id && self.dst.id == b.id) || (self.src.id == b.id && self.dst.id == a.id)
    }

    /// The endpoint that is not `router`, if `router` is an endpoint.
    pub fn other_end(&self, router: &Router) -> Option<Arc<Router>> {
        if self.src.id == router.id {
            Some(self.dst.clone())
        } else if self.dst.id == router.id {
            Some(self.src.clone())
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("src", &self.src.id)
            .field("dst", &self.dst.id)
            .field("mode", &self.current_mode())
            .field("cost", &self.static_cost)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(id: &str) -> Arc<Router> {
        Arc::new(Router::new(id, "", "", None))
    }

    #[test]
    fn most_recent_state_wins() {
        let link = Link::new("l0", router("a"), router("b"));
        assert_eq!(link.current_mode(), LinkMode::Pending);

        link.add_state(LinkState::new(LinkMode::Connected));
        assert_eq!(link.current_mode(), LinkMode::Connected);
        assert!(link.is_usable());

        link.add_state(LinkState::new(LinkMode::Failed));
        assert_eq!(link.current_mode(), LinkMode::Failed);
        assert!(!link.is_usable());
    }

    #[test]
    fn down_flag_makes_connected_link_unusable() {
        let link = Link::new("l0", router("a"), router("b"));
        link.add_state(LinkState::new(LinkMode::Connected));
        link.set_down(true);
        assert_eq!(link.current_mode(), LinkMode::Connected);
        assert!(!link.is_usable());
    }

    #[test]
    fn joins_is_orientation_blind() {
        let a = router("a");
        let b = router("b");
        let c = router("c");
        let link = Link::new("l0", a.clone(), b.clone());
        assert!(link.joins(&a, &b));
        assert!(link.joins(&b, &a));
        assert!(!link.joins(&a, &c));
        assert_eq!(link.other_end(&a).unwrap().id, b.id);
        assert!(link.other_end(&c).is_none());
    }
}
