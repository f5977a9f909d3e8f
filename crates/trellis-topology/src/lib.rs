//! # Trellis Topology
//!
//! The authoritative in-memory view of the fabric: routers, links, and
//! adjacency, safe for concurrent read/write from connection handlers and
//! the control loop.
//!
//! ## Components
//!
//! - [`Router`] / [`RouterRegistry`]: router entities and connectivity
//!   bookkeeping
//! - [`Link`] / [`LinkState`]: links with timestamped state histories and
//!   per-direction latencies
//! - [`LinkController`]: the paired link table + adjacency index, with
//!   neighbor and least-expensive-link queries

pub mod link;
pub mod links;
pub mod router;

pub use link::{Link, LinkMode, LinkState};
pub use links::LinkController;
pub use router::{Router, RouterRegistry};
