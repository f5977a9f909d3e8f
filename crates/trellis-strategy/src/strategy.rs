//! Terminator selection
//!
//! The controller annotates each candidate terminator with a routing cost
//! and hands the set to a strategy. Strategies also receive dial outcome
//! events so they can adapt precedence over time.

use std::sync::Arc;

use tracing::info;
use trellis_core::TerminatorId;
use trellis_store::TerminatorRecord;

use crate::costs::CostTable;
use crate::precedence::Precedence;

/// A terminator annotated with its current routing cost
#[derive(Debug, Clone)]
pub struct CostedTerminator {
    pub record: TerminatorRecord,
    pub precedence: Precedence,
    /// Precedence-biased cost plus the path cost to the terminator's
    /// router.
    pub route_cost: u32,
}

/// Dial outcomes reported back to the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatorEvent<'a> {
    DialSucceeded(&'a TerminatorId),
    DialFailed(&'a TerminatorId),
    DialTimeout(&'a TerminatorId),
}

/// Pluggable terminator selection
pub trait TerminatorStrategy: Send + Sync {
    /// Choose one terminator from the cost-annotated candidates, or `None`
    /// when the set is empty.
    fn select(&self, candidates: &[CostedTerminator]) -> Option<CostedTerminator>;

    /// Observe a dial outcome for adaptive behavior.
    fn notify_event(&self, event: TerminatorEvent<'_>);
}

/// Terminators sharing the precedence of the best-ranked candidate.
///
/// Input must already be sorted best-first.
pub fn leading_precedence_band(candidates: &[CostedTerminator]) -> &[CostedTerminator] {
    let Some(first) = candidates.first() else {
        return candidates;
    };
    let end = candidates
        .iter()
        .position(|c| c.precedence != first.precedence)
        .unwrap_or(candidates.len());
    &candidates[..end]
}

/// Default strategy: lowest cost inside the leading precedence band
///
/// Dial failures raise a terminator's dynamic cost; three consecutive
/// failures demote it to the Failed band. A success restores a demoted
/// terminator to Default and decays the penalty.
pub struct LowestCostStrategy {
    costs: Arc<CostTable>,
    failure_cost_step: u16,
    demotion_threshold: u32,
}

impl LowestCostStrategy {
    pub fn new(costs: Arc<CostTable>) -> Self {
        Self {
            costs,
            failure_cost_step: 20,
            demotion_threshold: 3,
        }
    }

    fn on_failure(&self, id: &TerminatorId) {
        let step = self.failure_cost_step;
        self.costs.update_dynamic_cost(id, |c| c.saturating_add(step));
        let failures = self.costs.record_failure(id);
        if failures >= self.demotion_threshold && !self.costs.precedence(id).is_failed() {
            info!(terminator = %id, failures, "demoting terminator to failed precedence");
            self.costs.set_precedence(id, Precedence::Failed);
        }
    }
}

impl TerminatorStrategy for LowestCostStrategy {
    fn select(&self, candidates: &[CostedTerminator]) -> Option<CostedTerminator> {
        let mut ranked: Vec<&CostedTerminator> = candidates.iter().collect();
        ranked.sort_by(|a, b| {
            a.precedence
                .cmp(&b.precedence)
                .then_with(|| a.route_cost.cmp(&b.route_cost))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        ranked.first().map(|c| (*c).clone())
    }

    fn notify_event(&self, event: TerminatorEvent<'_>) {
        match event {
            TerminatorEvent::DialSucceeded(id) => {
                self.costs.record_success(id);
                let step = self.failure_cost_step;
                self.costs.update_dynamic_cost(id, |c| c.saturating_sub(step));
                if self.costs.precedence(id).is_failed() {
                    info!(terminator = %id, "restoring failed terminator to default precedence");
                    self.costs.set_precedence(id, Precedence::Default);
                }
            }
            TerminatorEvent::DialFailed(id) | TerminatorEvent::DialTimeout(id) => {
                self.on_failure(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{RouterId, ServiceId};

    fn costed(id: &str, precedence: Precedence, route_cost: u32) -> CostedTerminator {
        CostedTerminator {
            record: TerminatorRecord {
                id: TerminatorId::new(id),
                service: ServiceId::new("svc"),
                router: RouterId::new("r1"),
                binding: "transport".to_string(),
                address: "tcp:1.2.3.4:80".to_string(),
                cost: 0,
                peer_data: Default::default(),
            },
            precedence,
            route_cost,
        }
    }

    #[test]
    fn precedence_beats_cost() {
        let strategy = LowestCostStrategy::new(Arc::new(CostTable::new()));
        let selected = strategy
            .select(&[
                costed("cheap-failed", Precedence::Failed, 1),
                costed("pricey-required", Precedence::Required, 900),
            ])
            .unwrap();
        assert_eq!(selected.record.id.as_str(), "pricey-required");
    }

    #[test]
    fn cost_breaks_ties_inside_a_band() {
        let strategy = LowestCostStrategy::new(Arc::new(CostTable::new()));
        let selected = strategy
            .select(&[
                costed("b", Precedence::Default, 10),
                costed("a", Precedence::Default, 5),
            ])
            .unwrap();
        assert_eq!(selected.record.id.as_str(), "a");
    }

    #[test]
    fn equal_cost_falls_back_to_id_order() {
        let strategy = LowestCostStrategy::new(Arc::new(CostTable::new()));
        let selected = strategy
            .select(&[
                costed("t2", Precedence::Default, 5),
                costed("t1", Precedence::Default, 5),
            ])
            .unwrap();
        assert_eq!(selected.record.id.as_str(), "t1");
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let strategy = LowestCostStrategy::new(Arc::new(CostTable::new()));
        assert!(strategy.select(&[]).is_none());
    }

    #[test]
    fn three_failures_demote_to_failed() {
        let costs = Arc::new(CostTable::new());
        let strategy = LowestCostStrategy::new(costs.clone());
        let id = TerminatorId::new("t1");

        for _ in 0..2 {
            strategy.notify_event(TerminatorEvent::DialFailed(&id));
        }
        assert!(!costs.precedence(&id).is_failed());

        strategy.notify_event(TerminatorEvent::DialTimeout(&id));
        assert!(costs.precedence(&id).is_failed());

        strategy.notify_event(TerminatorEvent::DialSucceeded(&id));
        assert!(costs.precedence(&id).is_default());
    }

    #[test]
    fn failures_raise_dynamic_cost() {
        let costs = Arc::new(CostTable::new());
        let strategy = LowestCostStrategy::new(costs.clone());
        let id = TerminatorId::new("t1");

        strategy.notify_event(TerminatorEvent::DialFailed(&id));
        let penalized = costs.stats(&id).dynamic_cost;
        assert!(penalized > 0);

        strategy.notify_event(TerminatorEvent::DialSucceeded(&id));
        assert!(costs.stats(&id).dynamic_cost < penalized);
    }

    #[test]
    fn leading_band_cuts_at_first_precedence_change() {
        let candidates = vec![
            costed("a", Precedence::Required, 1),
            costed("b", Precedence::Required, 2),
            costed("c", Precedence::Default, 0),
        ];
        let band = leading_precedence_band(&candidates);
        assert_eq!(band.len(), 2);
    }
}
