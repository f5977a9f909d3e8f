//! Terminator precedence bands
//!
//! Precedence is an ordered preference band consulted before cost: every
//! Required terminator outranks every Default one, which outranks every
//! Failed one. Each band maps to a disjoint cost interval so a single
//! biased cost number sorts across bands.

use serde::{Deserialize, Serialize};

const REQUIRED_INTERVAL_START: u32 = 0;
const DEFAULT_INTERVAL_START: u32 = 5000;
const FAILED_INTERVAL_START: u32 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Precedence {
    /// Always used in preference to non-required terminators. Example: the
    /// current active node of an active/passive pair.
    Required,
    /// Where terminators start.
    #[default]
    Default,
    /// Used only when every other terminator is also failed. Strategies
    /// demote a terminator here after repeated dial failures.
    Failed,
}

impl Precedence {
    fn interval_start(self) -> u32 {
        match self {
            Precedence::Required => REQUIRED_INTERVAL_START,
            Precedence::Default => DEFAULT_INTERVAL_START,
            Precedence::Failed => FAILED_INTERVAL_START,
        }
    }

    pub fn is_required(self) -> bool {
        self == Precedence::Required
    }

    pub fn is_default(self) -> bool {
        self == Precedence::Default
    }

    pub fn is_failed(self) -> bool {
        self == Precedence::Failed
    }

    /// Project a raw cost into this band's interval.
    pub fn biased_cost(self, cost: u32) -> u32 {
        self.interval_start().saturating_add(cost)
    }

    /// Strip the band bias back off a biased cost.
    pub fn unbias(self, biased: u32) -> u32 {
        biased.saturating_sub(self.interval_start())
    }
}

impl std::fmt::Display for Precedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Precedence::Required => "required",
            Precedence::Default => "default",
            Precedence::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_order_required_first() {
        assert!(Precedence::Required < Precedence::Default);
        assert!(Precedence::Default < Precedence::Failed);
    }

    #[test]
    fn biased_costs_never_cross_bands() {
        // the largest plausible raw cost stays inside its band
        let raw = 4999;
        assert!(Precedence::Required.biased_cost(raw) < Precedence::Default.biased_cost(0));
        assert!(Precedence::Default.biased_cost(raw) < Precedence::Failed.biased_cost(0));
    }

    #[test]
    fn unbias_reverses_bias() {
        let biased = Precedence::Default.biased_cost(37);
        assert_eq!(Precedence::Default.unbias(biased), 37);
    }
}
