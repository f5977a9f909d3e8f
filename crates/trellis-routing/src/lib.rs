//! # Trellis Routing
//!
//! The path engine: least-cost path computation over the live topology and
//! per-hop route-message construction.
//!
//! ## Cost convention
//!
//! A path's cost sums, per hop, the connecting link's static cost and both
//! directional latencies, plus the cost factor of every router *entered*
//! along the way. The source router's factor is excluded; the
//! destination's is included. See [`engine`] for the tie-break rules that
//! keep equal-cost paths deterministic.

pub mod engine;
pub mod path;
pub mod route;

pub use engine::PathEngine;
pub use path::Path;
pub use route::{EgressSpec, create_route_messages};
