//! Route-message distribution and acknowledgement attendance
//!
//! For each circuit attempt, a route sender pushes one route message to
//! every hop concurrently and then waits for every hop to acknowledge.
//! Acks arrive asynchronously from router connections and are routed to
//! the right waiter through the circuit-id-keyed registry.
//!
//! Send failures are logged and do not fail the attempt by themselves; an
//! attempt fails only on an explicit failure ack or on the deadline. Acks
//! for a superseded attempt are logged and dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};
use trellis_core::{
    CircuitId, Message, PeerData, RouteError, RoutePayload, RouterId, TerminatorId,
    message::{content, header},
};
use trellis_routing::Path;
use trellis_strategy::{TerminatorEvent, TerminatorStrategy};
use trellis_topology::Router;

/// How long a single route-message send may take on the wire.
const SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Acknowledgement capacity per in-flight circuit attempt.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// A route acknowledgement produced by a router
///
/// Consumed exactly once by the route sender of the matching circuit.
#[derive(Debug, Clone)]
pub struct RouteStatus {
    pub router_id: RouterId,
    pub circuit_id: CircuitId,
    pub attempt: u32,
    pub success: bool,
    pub peer_data: PeerData,
    pub error: Option<String>,
}

impl RouteStatus {
    /// Decode a route-result message received from `router_id`.
    ///
    /// Returns `None` for non-route-result content or a missing attempt
    /// header.
    pub fn from_message(router_id: RouterId, msg: &Message) -> Option<Self> {
        if msg.content_type != content::ROUTE_RESULT {
            return None;
        }
        let attempt = msg.get_u32_header(header::ROUTE_ATTEMPT)?;
        Some(Self {
            router_id,
            circuit_id: CircuitId::new(String::from_utf8_lossy(&msg.body).into_owned()),
            attempt,
            success: msg.get_bool_header(header::ROUTE_SUCCESS),
            peer_data: PeerData::new(),
            error: msg.get_string_header(header::ROUTE_ERROR),
        })
    }
}

/// Routes inbound acknowledgements to the waiter for their circuit
#[derive(Default)]
pub struct RouteSenderRegistry {
    senders: DashMap<CircuitId, mpsc::Sender<RouteStatus>>,
}

impl RouteSenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register the route sender for a circuit. A later
    /// registration for the same circuit supersedes the earlier one.
    pub fn register(&self, circuit_id: CircuitId, timeout: Duration) -> RouteSender {
        let (tx, rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        self.senders.insert(circuit_id.clone(), tx);
        RouteSender {
            circuit_id,
            timeout,
            rx,
        }
    }

    pub fn remove(&self, circuit_id: &CircuitId) {
        self.senders.remove(circuit_id);
    }

    /// Deliver an acknowledgement to its waiter. Unmatched
    /// acknowledgements are logged and dropped, never fatal.
    pub fn forward_route_result(&self, status: RouteStatus) -> bool {
        let Some(tx) = self
            .senders
            .get(&status.circuit_id)
            .map(|entry| entry.value().clone())
        else {
            warn!(circuit = %status.circuit_id, router = %status.router_id,
                "no route sender waiting for acknowledgement");
            return false;
        };
        if let Err(err) = tx.try_send(status) {
            warn!(error = %err, "dropping route acknowledgement");
            return false;
        }
        true
    }
}

/// Outcome of a failed route attempt
#[derive(Debug)]
pub struct RouteFailure {
    /// Hops that acknowledged success before the attempt failed; the
    /// caller owes each an unroute.
    pub cleanups: HashSet<RouterId>,
    pub error: RouteError,
}

/// Per-circuit, per-attempt distribution coordinator
pub struct RouteSender {
    circuit_id: CircuitId,
    timeout: Duration,
    rx: mpsc::Receiver<RouteStatus>,
}

impl RouteSender {
    /// Send `route_msgs\[i\]` to `path.nodes\[i\]` for all hops and block
    /// until every hop acknowledges success, any hop reports failure, or
    /// the deadline elapses.
    ///
    /// Dial outcomes for `terminator` are reported to `strategy`. On
    /// success returns the peer data reported by the terminating hop.
    pub async fn route(
        &mut self,
        attempt: u32,
        path: &Path,
        route_msgs: &[RoutePayload],
        strategy: &dyn TerminatorStrategy,
        terminator: &TerminatorId,
    ) -> Result<PeerData, RouteFailure> {
        let terminating_router = path.terminating_router().id.clone();
        let mut attendance: HashMap<RouterId, bool> = HashMap::new();

        for (router, payload) in path.nodes.iter().zip(route_msgs) {
            debug!(circuit = %self.circuit_id, router = %router.id, attempt,
                "sending route message");
            send_route(router.clone(), payload.clone());
            attendance.insert(router.id.clone(), false);
        }

        let deadline = Instant::now() + self.timeout;
        let mut peer_data = PeerData::new();

        loop {
            let status = tokio::select! {
                maybe = self.rx.recv() => maybe,
                () = sleep_until(deadline) => None,
            };

            let Some(status) = status else {
                strategy.notify_event(TerminatorEvent::DialTimeout(terminator));
                return Err(RouteFailure {
                    cleanups: cleanups(&attendance),
                    error: RouteError::Timeout {
                        circuit_id: self.circuit_id.clone(),
                    },
                });
            };

            if status.attempt != attempt {
                warn!(circuit = %self.circuit_id, router = %status.router_id,
                    stale = status.attempt, current = attempt,
                    "discarding acknowledgement for superseded attempt");
                continue;
            }

            if status.success {
                debug!(circuit = %self.circuit_id, router = %status.router_id, attempt,
                    "received successful route status");
                attendance.insert(status.router_id.clone(), true);
                if status.router_id == terminating_router {
                    peer_data = status.peer_data;
                    strategy.notify_event(TerminatorEvent::DialSucceeded(terminator));
                }
            } else {
                let reason = status.error.unwrap_or_else(|| "unspecified".to_string());
                warn!(circuit = %self.circuit_id, router = %status.router_id, attempt,
                    reason, "received failed route status");
                if status.router_id == terminating_router {
                    strategy.notify_event(TerminatorEvent::DialFailed(terminator));
                }
                return Err(RouteFailure {
                    cleanups: cleanups(&attendance),
                    error: RouteError::Rejected {
                        circuit_id: self.circuit_id.clone(),
                        router_id: status.router_id,
                        reason,
                    },
                });
            }

            if attendance.values().all(|present| *present) {
                return Ok(peer_data);
            }
        }
    }
}

/// Hops that have already acknowledged success.
fn cleanups(attendance: &HashMap<RouterId, bool>) -> HashSet<RouterId> {
    attendance
        .iter()
        .filter(|(_, present)| **present)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Fire-and-forget route-message send; failures are logged, not returned.
fn send_route(router: Arc<Router>, payload: RoutePayload) {
    tokio::spawn(async move {
        let msg = match Message::with_payload(content::ROUTE, &payload) {
            Ok(msg) => msg,
            Err(err) => {
                error!(router = %router.id, error = %err, "failed to encode route message");
                return;
            }
        };
        let Some(control) = router.control() else {
            error!(router = %router.id, "no control channel for route message");
            return;
        };
        if let Err(err) = control.send_with_timeout(msg, SEND_TIMEOUT).await {
            error!(router = %router.id, error = %err, "failure sending route message");
        } else {
            debug!(router = %router.id, "sent route message");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::RecordingChannel;
    use trellis_strategy::CostedTerminator;

    /// Strategy stub that counts dial events.
    #[derive(Default)]
    struct CountingStrategy {
        succeeded: std::sync::atomic::AtomicUsize,
        failed: std::sync::atomic::AtomicUsize,
        timed_out: std::sync::atomic::AtomicUsize,
    }

    impl TerminatorStrategy for CountingStrategy {
        fn select(&self, _candidates: &[CostedTerminator]) -> Option<CostedTerminator> {
            None
        }

        fn notify_event(&self, event: TerminatorEvent<'_>) {
            use std::sync::atomic::Ordering::Relaxed;
            match event {
                TerminatorEvent::DialSucceeded(_) => self.succeeded.fetch_add(1, Relaxed),
                TerminatorEvent::DialFailed(_) => self.failed.fetch_add(1, Relaxed),
                TerminatorEvent::DialTimeout(_) => self.timed_out.fetch_add(1, Relaxed),
            };
        }
    }

    fn three_hop_path() -> (Path, Vec<Arc<RecordingChannel>>) {
        let channels: Vec<Arc<RecordingChannel>> =
            (0..3).map(|_| Arc::new(RecordingChannel::new())).collect();
        let routers: Vec<Arc<Router>> = (0..3)
            .map(|i| {
                Arc::new(Router::new(
                    format!("r{i}"),
                    "",
                    "",
                    Some(channels[i].clone() as Arc<dyn trellis_core::ControlChannel>),
                ))
            })
            .collect();
        let links: Vec<Arc<trellis_topology::Link>> = (0..2)
            .map(|i| {
                let link =
                    trellis_topology::Link::new(format!("l{i}"), routers[i].clone(), routers[i + 1].clone());
                link.add_state(trellis_topology::LinkState::new(trellis_topology::LinkMode::Connected));
                Arc::new(link)
            })
            .collect();
        let path = Path {
            nodes: routers,
            links,
            ingress_address: "i1".to_string(),
            egress_address: "e1".to_string(),
        };
        (path, channels)
    }

    fn route_msgs(path: &Path, attempt: u32) -> Vec<RoutePayload> {
        trellis_routing::create_route_messages(
            path,
            &CircuitId::new("c1"),
            attempt,
            &trellis_routing::EgressSpec {
                binding: "transport".to_string(),
                address: "tcp:1.1.1.1:1".to_string(),
                peer_data: PeerData::new(),
            },
        )
    }

    fn status(router: &str, attempt: u32, success: bool) -> RouteStatus {
        RouteStatus {
            router_id: RouterId::new(router),
            circuit_id: CircuitId::new("c1"),
            attempt,
            success,
            peer_data: PeerData::new(),
            error: (!success).then(|| "resource exhausted".to_string()),
        }
    }

    #[tokio::test]
    async fn all_hops_acknowledging_completes_with_peer_data() {
        let registry = Arc::new(RouteSenderRegistry::new());
        let (path, channels) = three_hop_path();
        let mut sender = registry.register(CircuitId::new("c1"), Duration::from_secs(5));
        let msgs = route_msgs(&path, 1);
        let strategy = CountingStrategy::default();

        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            feeder.forward_route_result(status("r0", 1, true));
            feeder.forward_route_result(status("r1", 1, true));
            let mut egress_ack = status("r2", 1, true);
            egress_ack.peer_data.insert(7, vec![1, 2, 3]);
            feeder.forward_route_result(egress_ack);
        });

        let peer_data = sender
            .route(1, &path, &msgs, &strategy, &TerminatorId::new("t1"))
            .await
            .unwrap();

        assert_eq!(peer_data.get(&7), Some(&vec![1, 2, 3]));
        assert_eq!(
            strategy.succeeded.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        // every hop received its route message
        tokio::time::sleep(Duration::from_millis(20)).await;
        for channel in &channels {
            assert_eq!(channel.sent_count(), 1);
        }
    }

    #[tokio::test]
    async fn failed_hop_returns_cleanups_of_prior_successes() {
        let registry = Arc::new(RouteSenderRegistry::new());
        let (path, _channels) = three_hop_path();
        let mut sender = registry.register(CircuitId::new("c1"), Duration::from_secs(5));
        let msgs = route_msgs(&path, 1);
        let strategy = CountingStrategy::default();

        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            feeder.forward_route_result(status("r0", 1, true));
            feeder.forward_route_result(status("r2", 1, true));
            feeder.forward_route_result(status("r1", 1, false));
        });

        let failure = sender
            .route(1, &path, &msgs, &strategy, &TerminatorId::new("t1"))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, RouteError::Rejected { .. }));
        let mut cleanups: Vec<&str> = failure.cleanups.iter().map(|r| r.as_str()).collect();
        cleanups.sort_unstable();
        assert_eq!(cleanups, ["r0", "r2"]);
        // middle hop is not the terminator, so no dial-failed event
        assert_eq!(strategy.failed.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn stale_attempt_acknowledgements_are_discarded() {
        let registry = Arc::new(RouteSenderRegistry::new());
        let (path, _channels) = three_hop_path();
        let mut sender = registry.register(CircuitId::new("c1"), Duration::from_millis(100));
        let msgs = route_msgs(&path, 2);
        let strategy = CountingStrategy::default();

        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // acknowledgements from the superseded attempt
            feeder.forward_route_result(status("r0", 1, true));
            feeder.forward_route_result(status("r1", 1, false));
        });

        let failure = sender
            .route(2, &path, &msgs, &strategy, &TerminatorId::new("t1"))
            .await
            .unwrap_err();

        // stale acks neither fail the attempt nor land in the cleanup set
        assert!(matches!(failure.error, RouteError::Timeout { .. }));
        assert!(failure.cleanups.is_empty());
        assert_eq!(
            strategy.timed_out.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn timeout_reports_hops_that_did_succeed() {
        let registry = Arc::new(RouteSenderRegistry::new());
        let (path, _channels) = three_hop_path();
        let mut sender = registry.register(CircuitId::new("c1"), Duration::from_millis(100));
        let msgs = route_msgs(&path, 1);
        let strategy = CountingStrategy::default();

        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            feeder.forward_route_result(status("r0", 1, true));
            // r1 and r2 never answer
        });

        let failure = sender
            .route(1, &path, &msgs, &strategy, &TerminatorId::new("t1"))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, RouteError::Timeout { .. }));
        assert_eq!(failure.cleanups.len(), 1);
        assert!(failure.cleanups.contains(&RouterId::new("r0")));
    }

    #[test]
    fn route_status_decodes_acknowledgement_messages() {
        let success = trellis_core::message::new_route_result_success("c9", 3);
        let status = RouteStatus::from_message(RouterId::new("r1"), &success).unwrap();
        assert_eq!(status.circuit_id.as_str(), "c9");
        assert_eq!(status.attempt, 3);
        assert!(status.success);
        assert!(status.error.is_none());

        let failed = trellis_core::message::new_route_result_failed(
            "c9",
            4,
            "dial refused",
            trellis_core::message::error_code::CONNECTION_REFUSED,
        );
        let status = RouteStatus::from_message(RouterId::new("r1"), &failed).unwrap();
        assert!(!status.success);
        assert_eq!(status.attempt, 4);
        assert_eq!(status.error.as_deref(), Some("dial refused"));

        let other = Message::new(content::UNROUTE, vec![]);
        assert!(RouteStatus::from_message(RouterId::new("r1"), &other).is_none());
    }

    #[tokio::test]
    async fn send_failures_do_not_fail_the_attempt() {
        // routers whose control channels are down still count once their
        // acknowledgements arrive through another path
        let registry = Arc::new(RouteSenderRegistry::new());
        let routers: Vec<Arc<Router>> = (0..2)
            .map(|i| {
                Arc::new(Router::new(
                    format!("r{i}"),
                    "",
                    "",
                    Some(Arc::new(trellis_core::DownChannel) as Arc<dyn trellis_core::ControlChannel>),
                ))
            })
            .collect();
        let link = trellis_topology::Link::new("l0", routers[0].clone(), routers[1].clone());
        link.add_state(trellis_topology::LinkState::new(trellis_topology::LinkMode::Connected));
        let path = Path {
            nodes: routers,
            links: vec![Arc::new(link)],
            ingress_address: "i1".to_string(),
            egress_address: "e1".to_string(),
        };
        let msgs = route_msgs(&path, 1);
        let mut sender = registry.register(CircuitId::new("c1"), Duration::from_secs(5));
        let strategy = CountingStrategy::default();

        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            feeder.forward_route_result(status("r0", 1, true));
            feeder.forward_route_result(status("r1", 1, true));
        });

        let result = sender
            .route(1, &path, &msgs, &strategy, &TerminatorId::new("t1"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unmatched_acknowledgement_is_dropped() {
        let registry = RouteSenderRegistry::new();
        assert!(!registry.forward_route_result(status("r0", 1, true)));
    }

    #[tokio::test]
    async fn concurrent_senders_do_not_cross_circuits() {
        let registry = Arc::new(RouteSenderRegistry::new());
        let (path_a, _) = three_hop_path();
        let mut sender_a = registry.register(CircuitId::new("cA"), Duration::from_secs(5));
        let mut sender_b = registry.register(CircuitId::new("cB"), Duration::from_millis(100));
        let msgs_a = route_msgs(&path_a, 1);
        let (path_b, _) = three_hop_path();
        let msgs_b = route_msgs(&path_b, 1);

        let feeder = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for router in ["r0", "r1", "r2"] {
                let mut ack = status(router, 1, true);
                ack.circuit_id = CircuitId::new("cA");
                feeder.forward_route_result(ack);
            }
        });

        let strategy = CountingStrategy::default();
        let a = sender_a
            .route(1, &path_a, &msgs_a, &strategy, &TerminatorId::new("t1"))
            .await;
        let b = sender_b
            .route(1, &path_b, &msgs_b, &strategy, &TerminatorId::new("t1"))
            .await;

        assert!(a.is_ok());
        // circuit B saw none of circuit A's acknowledgements
        assert!(matches!(b.unwrap_err().error, RouteError::Timeout { .. }));
    }
}
