//! Route-message construction
//!
//! One route-setup message per path hop. The ingress hop stitches the
//! ingress address to the first link, transit hops stitch link to link,
//! and the terminating hop stitches the last link to the egress address
//! and additionally carries the terminator's dial instructions.

use trellis_core::{CircuitId, Egress, Forward, PeerData, RoutePayload};

use crate::path::Path;

/// Terminator-side dial instructions for the egress hop
#[derive(Debug, Clone)]
pub struct EgressSpec {
    pub binding: String,
    pub address: String,
    pub peer_data: PeerData,
}

/// Build the per-hop route messages for one attempt of a circuit.
pub fn create_route_messages(
    path: &Path,
    circuit_id: &CircuitId,
    attempt: u32,
    egress: &EgressSpec,
) -> Vec<RoutePayload> {
    let hops = path.nodes.len();
    let mut messages = Vec::with_capacity(hops);

    for i in 0..hops {
        let mut forwards = Vec::new();
        let terminating = i == hops - 1;

        let inbound = if i == 0 {
            path.ingress_address.clone()
        } else {
            path.links[i - 1].id.to_string()
        };
        let outbound = if terminating {
            path.egress_address.clone()
        } else {
            path.links[i].id.to_string()
        };
        forwards.push(Forward {
            src_address: inbound,
            dst_address: outbound,
        });

        messages.push(RoutePayload {
            circuit_id: circuit_id.clone(),
            attempt,
            forwards,
            egress: terminating.then(|| Egress {
                binding: egress.binding.clone(),
                address: egress.address.clone(),
                destination: path.egress_address.clone(),
                peer_data: egress.peer_data.clone(),
            }),
        });
    }

    messages
}
