//! # Trellis Strategy
//!
//! Terminator selection for circuit creation: precedence bands, the
//! injected dynamic cost table, and the pluggable selection strategy
//! consulted by the circuit manager.

pub mod costs;
pub mod precedence;
pub mod strategy;

pub use costs::{CostTable, TerminatorStats};
pub use precedence::Precedence;
pub use strategy::{
    CostedTerminator, LowestCostStrategy, TerminatorEvent, TerminatorStrategy,
    leading_precedence_band,
};
