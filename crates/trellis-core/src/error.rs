//! Error types for the Trellis control plane

use thiserror::Error;

use crate::identity::{CircuitId, RouterId};

/// Top-level error type for the fabric controller
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors surfaced by path computation and route establishment
#[derive(Debug, Error)]
pub enum RouteError {
    /// No path exists between the requested endpoints, or an endpoint is
    /// missing from the connected topology.
    #[error("not routable ({0})")]
    NotRoutable(String),

    /// A hop failed to acknowledge a route message within the deadline.
    #[error("timeout creating routes for circuit {circuit_id}")]
    Timeout { circuit_id: CircuitId },

    /// A hop explicitly reported failure for the current attempt.
    #[error("error creating route for circuit {circuit_id} on router {router_id} ({reason})")]
    Rejected {
        circuit_id: CircuitId,
        router_id: RouterId,
        reason: String,
    },
}

/// Errors for entity lookups and circuit table membership
#[derive(Debug, Error)]
pub enum EntityError {
    /// A referenced service, router, or terminator does not exist.
    #[error("invalid {kind} ({id})")]
    Invalid { kind: &'static str, id: String },

    /// The circuit id is not present in the circuit table.
    #[error("invalid circuit ({0})")]
    InvalidCircuit(CircuitId),
}

impl EntityError {
    pub fn invalid(kind: &'static str, id: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            id: id.into(),
        }
    }
}

/// Errors on the control channel to a router
///
/// A channel error during route distribution is a per-hop route failure,
/// never fatal to the controller process.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("control channel closed")]
    Closed,

    #[error("timed out waiting for control channel send")]
    Timeout,

    #[error("router {0} is not connected")]
    NotConnected(RouterId),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<postcard::Error> for ChannelError {
    fn from(err: postcard::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Errors from the persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no entity with id {0}")]
    NotFound(String),

    #[error("entity with id {0} already exists")]
    Duplicate(String),
}

/// Configuration validation failure
///
/// Validation collects every violation before reporting, rather than
/// stopping at the first bad field.
#[derive(Debug, Error)]
#[error("invalid configuration: {}", .violations.join("; "))]
pub struct ConfigError {
    pub violations: Vec<String>,
}
