//! # Trellis Control
//!
//! The fabric controller proper: circuit lifecycle, route-message
//! distribution with acknowledgement attendance, the serialized network
//! control loop, and the smart rerouting optimizer.
//!
//! ## Shape
//!
//! - [`Network`] owns the live topology, circuit table, and control loop
//! - [`Circuit`] / [`CircuitTable`]: established circuits, per-key atomic
//! - [`RouteSender`] / [`RouteSenderRegistry`]: per-attempt acknowledgement
//!   rendezvous for route distribution
//! - [`NetworkOptions`]: validated controller configuration
//! - [`NetworkEvent`]: broadcast lifecycle event stream
//!
//! Circuit creation blocks on a route rendezvous and must be spawned off
//! any connection receive path; everything else returns promptly.

pub mod circuit;
pub mod events;
pub mod network;
pub mod options;
pub mod route_sender;
pub mod smart;

pub use circuit::{Circuit, CircuitTable};
pub use events::{EventBus, NetworkEvent};
pub use network::Network;
pub use options::{NetworkOptions, SmartOptions};
pub use route_sender::{RouteFailure, RouteSender, RouteSenderRegistry, RouteStatus};
pub use smart::smart_ceiling;
