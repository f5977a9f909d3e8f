//! Typed payloads of the control protocol
//!
//! These are the message bodies the controller exchanges with routers,
//! encoded with postcard inside [`Message`](crate::message::Message)
//! envelopes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity::{CircuitId, LinkId, RouterId};

/// Opaque per-circuit key-value data exchanged during route setup
pub type PeerData = HashMap<u32, Vec<u8>>;

/// Route-setup instruction for one hop of a circuit path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePayload {
    pub circuit_id: CircuitId,
    pub attempt: u32,
    /// Local forwarding table entries for this hop.
    pub forwards: Vec<Forward>,
    /// Present only on the terminating hop.
    pub egress: Option<Egress>,
}

/// A forwarding table entry: traffic arriving on `src_address` leaves on
/// `dst_address`, and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forward {
    pub src_address: String,
    pub dst_address: String,
}

/// Egress instructions for the terminating hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Egress {
    pub binding: String,
    pub address: String,
    pub destination: String,
    pub peer_data: PeerData,
}

/// Instruction to release local forwarding state for a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnroutePayload {
    pub circuit_id: CircuitId,
    /// When true the router tears down immediately instead of draining.
    pub now: bool,
}

/// Instruction to dial a new link to a neighboring router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialPayload {
    pub link_id: LinkId,
    pub address: String,
    pub router_id: RouterId,
}

/// Fault subjects reported by routers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultSubject {
    Link,
    Ingress,
    Egress,
}

/// A fault report from a router's receive path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPayload {
    pub subject: FaultSubject,
    pub id: String,
}
