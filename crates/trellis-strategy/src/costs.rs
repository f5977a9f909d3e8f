//! Dynamic terminator cost table
//!
//! Precedence and the dynamic cost component are transient health signals,
//! kept out of the persisted terminator record so they can be updated on
//! every dial outcome without an entity write. The table is an injected
//! component owned by the controller's construction; there is no
//! process-wide instance.

use dashmap::DashMap;
use trellis_core::TerminatorId;

use crate::precedence::Precedence;

/// Transient cost state of one terminator
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminatorStats {
    pub precedence: Precedence,
    /// Health penalty added on top of the terminator's static cost.
    pub dynamic_cost: u16,
    /// Consecutive dial failures since the last success.
    pub consecutive_failures: u32,
}

/// Per-terminator precedence and dynamic cost, keyed by terminator id
#[derive(Default)]
pub struct CostTable {
    stats: DashMap<TerminatorId, TerminatorStats>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for a terminator; unknown ids report the defaults.
    pub fn stats(&self, id: &TerminatorId) -> TerminatorStats {
        self.stats.get(id).map(|s| *s).unwrap_or_default()
    }

    pub fn precedence(&self, id: &TerminatorId) -> Precedence {
        self.stats(id).precedence
    }

    pub fn set_precedence(&self, id: &TerminatorId, precedence: Precedence) {
        self.stats.entry(id.clone()).or_default().precedence = precedence;
    }

    pub fn set_dynamic_cost(&self, id: &TerminatorId, cost: u16) {
        self.stats.entry(id.clone()).or_default().dynamic_cost = cost;
    }

    /// Adjust the dynamic cost through `update`, saturating at the type
    /// bounds.
    pub fn update_dynamic_cost(&self, id: &TerminatorId, update: impl FnOnce(u16) -> u16) {
        let mut entry = self.stats.entry(id.clone()).or_default();
        entry.dynamic_cost = update(entry.dynamic_cost);
    }

    pub(crate) fn record_failure(&self, id: &TerminatorId) -> u32 {
        let mut entry = self.stats.entry(id.clone()).or_default();
        entry.consecutive_failures += 1;
        entry.consecutive_failures
    }

    pub(crate) fn record_success(&self, id: &TerminatorId) {
        let mut entry = self.stats.entry(id.clone()).or_default();
        entry.consecutive_failures = 0;
    }

    /// Forget a terminator entirely; called when its record is deleted.
    pub fn clear(&self, id: &TerminatorId) {
        self.stats.remove(id);
    }

    /// Precedence-biased routing cost: the static record cost plus the
    /// dynamic health penalty, projected into the precedence band.
    pub fn route_cost(&self, id: &TerminatorId, static_cost: u16) -> u32 {
        let stats = self.stats(id);
        let raw = u32::from(static_cost).saturating_add(u32::from(stats.dynamic_cost));
        stats.precedence.biased_cost(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TerminatorId {
        TerminatorId::new(s)
    }

    #[test]
    fn unknown_terminator_defaults_to_default_band() {
        let table = CostTable::new();
        assert_eq!(table.precedence(&id("t")), Precedence::Default);
        assert_eq!(table.route_cost(&id("t"), 10), Precedence::Default.biased_cost(10));
    }

    #[test]
    fn route_cost_combines_static_dynamic_and_band() {
        let table = CostTable::new();
        table.set_precedence(&id("t"), Precedence::Required);
        table.set_dynamic_cost(&id("t"), 7);
        assert_eq!(table.route_cost(&id("t"), 10), 17);
    }

    #[test]
    fn clear_resets_to_defaults() {
        let table = CostTable::new();
        table.set_precedence(&id("t"), Precedence::Failed);
        table.clear(&id("t"));
        assert_eq!(table.precedence(&id("t")), Precedence::Default);
    }

    #[test]
    fn update_dynamic_cost_applies_closure() {
        let table = CostTable::new();
        table.set_dynamic_cost(&id("t"), 10);
        table.update_dynamic_cost(&id("t"), |c| c.saturating_add(5));
        assert_eq!(table.stats(&id("t")).dynamic_cost, 15);
    }
}
