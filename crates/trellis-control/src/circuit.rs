//! Circuits and the circuit table

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use trellis_core::{CircuitId, IdGenerator, LinkId, PeerData, RouterId, ServiceId};
use trellis_routing::Path;
use trellis_store::TerminatorRecord;

/// An established end-to-end route for a service request
///
/// The path is replaced wholesale on reroute; everything else is fixed at
/// creation.
pub struct Circuit {
    pub id: CircuitId,
    /// Client identity token presented at creation.
    pub client_id: String,
    pub service: ServiceId,
    pub terminator: TerminatorRecord,
    /// Runtime peer data returned by the terminating hop during setup.
    pub peer_data: PeerData,
    path: RwLock<Arc<Path>>,
    rerouting: AtomicBool,
    /// Next route-dispatch attempt number.
    attempts: AtomicU32,
}

impl Circuit {
    pub fn new(
        id: CircuitId,
        client_id: String,
        service: ServiceId,
        terminator: TerminatorRecord,
        path: Arc<Path>,
        peer_data: PeerData,
        next_attempt: u32,
    ) -> Self {
        Self {
            id,
            client_id,
            service,
            terminator,
            peer_data,
            path: RwLock::new(path),
            rerouting: AtomicBool::new(false),
            attempts: AtomicU32::new(next_attempt),
        }
    }

    pub fn path(&self) -> Arc<Path> {
        self.path.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_path(&self, path: Arc<Path>) {
        *self.path.write().unwrap_or_else(|e| e.into_inner()) = path;
    }

    /// Sum of directional link latencies along the current path.
    pub fn latency(&self) -> i64 {
        self.path().latency()
    }

    pub fn has_router(&self, router_id: &RouterId) -> bool {
        self.path().nodes.iter().any(|r| &r.id == router_id)
    }

    pub fn uses_link(&self, link_id: &LinkId) -> bool {
        self.path().uses_link(link_id)
    }

    /// Claim the next attempt number.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel)
    }

    /// Try to claim the reroute guard. Only one reroute may run per
    /// circuit at a time.
    pub fn begin_reroute(&self) -> bool {
        self.rerouting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_reroute(&self) {
        self.rerouting.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("terminator", &self.terminator.id)
            .field("path", &self.path().to_string())
            .finish()
    }
}

/// Concurrent circuit membership, keyed by circuit id
///
/// Per-key atomicity only; whole-table scans are snapshots.
#[derive(Default)]
pub struct CircuitTable {
    circuits: DashMap<CircuitId, Arc<Circuit>>,
    id_generator: IdGenerator,
}

impl CircuitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_circuit_id(&self) -> CircuitId {
        CircuitId::new(self.id_generator.next_id())
    }

    pub fn add(&self, circuit: Arc<Circuit>) {
        self.circuits.insert(circuit.id.clone(), circuit);
    }

    pub fn get(&self, id: &CircuitId) -> Option<Arc<Circuit>> {
        self.circuits.get(id).map(|c| c.value().clone())
    }

    /// Remove and return the circuit; the claim is atomic, so concurrent
    /// removers see exactly one winner.
    pub fn remove(&self, id: &CircuitId) -> Option<Arc<Circuit>> {
        self.circuits.remove(id).map(|(_, c)| c)
    }

    pub fn all(&self) -> Vec<Arc<Circuit>> {
        self.circuits.iter().map(|c| c.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.circuits.len()
    }
}
