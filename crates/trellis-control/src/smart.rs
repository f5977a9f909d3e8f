//! Smart rerouting
//!
//! Periodic opportunistic path optimization. Not a correctness mechanism:
//! a cycle that reroutes nothing is fine, and per-circuit failures leave
//! the circuit on its old path. Churn is capped per cycle by the
//! configured fraction and hard cap, worst-latency circuits first.

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::circuit::Circuit;
use crate::network::Network;

/// Per-cycle reroute ceiling: `fraction` of the active circuits, at least
/// one when any exist, never more than `cap`.
pub fn smart_ceiling(circuit_count: usize, fraction: f32, cap: u32) -> usize {
    if circuit_count == 0 {
        return 0;
    }
    let by_fraction = (circuit_count as f32 * fraction).floor() as usize;
    by_fraction.max(1).min(cap as usize)
}

impl Network {
    pub(crate) async fn smart(&self) {
        trace!("smart network processing");

        let mut circuits = self.all_circuits();
        if circuits.is_empty() {
            trace!("observing no circuits");
            return;
        }
        debug!(circuits = circuits.len(), "observing circuits");

        // worst latency first; stable so equal-latency circuits keep
        // table order
        let mut ordered: Vec<(Arc<Circuit>, i64)> = circuits
            .drain(..)
            .map(|c| {
                let latency = c.latency();
                (c, latency)
            })
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1));

        let ceiling = smart_ceiling(
            ordered.len(),
            self.options().smart.reroute_fraction,
            self.options().smart.reroute_cap,
        );
        trace!(ceiling, "smart reroute ceiling");

        let mut candidates = Vec::new();
        for (circuit, latency) in ordered {
            if candidates.len() >= ceiling {
                break;
            }
            let current = circuit.path();
            let Ok(updated) = self.path_engine().update_path(&current) else {
                continue;
            };
            if !updated.same_path(&current) {
                debug!(circuit = %circuit.id, latency, from = %current, to = %updated,
                    "reroute candidate");
                candidates.push((circuit, Arc::new(updated)));
            }
        }

        for (circuit, new_path) in candidates {
            if !circuit.begin_reroute() {
                continue;
            }
            let result = self.dispatch_path(&circuit, new_path).await;
            circuit.end_reroute();
            if let Err(err) = result {
                // circuit stays on its old path
                error!(circuit = %circuit.id, error = %err, "error smart rerouting");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_caps_a_large_population() {
        // the reference point: 1000 circuits at 2% capped at 4
        assert_eq!(smart_ceiling(1000, 0.02, 4), 4);
    }

    #[test]
    fn ceiling_scales_by_fraction_under_the_cap() {
        assert_eq!(smart_ceiling(100, 0.02, 4), 2);
        assert_eq!(smart_ceiling(150, 0.02, 4), 3);
    }

    #[test]
    fn ceiling_is_at_least_one_when_circuits_exist() {
        assert_eq!(smart_ceiling(1, 0.02, 4), 1);
        assert_eq!(smart_ceiling(10, 0.02, 4), 1);
    }

    #[test]
    fn ceiling_is_zero_without_circuits() {
        assert_eq!(smart_ceiling(0, 0.02, 4), 0);
    }
}
