//! # Trellis Core
//!
//! Core identifiers, errors, and control-channel primitives shared by the
//! Trellis fabric controller crates.
//!
//! ## Contents
//!
//! - Identity newtypes ([`RouterId`], [`LinkId`], [`CircuitId`], ...)
//! - The controller error taxonomy ([`FabricError`] and friends)
//! - The control-message envelope ([`Message`]) and typed payloads
//! - The [`ControlChannel`] trait routers are reached through
//! - Random id generation ([`IdGenerator`])

pub mod channel;
pub mod ctrl;
pub mod error;
pub mod identity;
pub mod idgen;
pub mod message;

pub use channel::{ControlChannel, DownChannel, RecordingChannel};
pub use ctrl::{
    DialPayload, Egress, FaultPayload, FaultSubject, Forward, PeerData, RoutePayload,
    UnroutePayload,
};
pub use error::{ChannelError, ConfigError, EntityError, FabricError, RouteError, StoreError};
pub use identity::{CircuitId, LinkId, RouterId, ServiceId, TerminatorId};
pub use idgen::IdGenerator;
pub use message::Message;
