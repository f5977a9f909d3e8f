//! # Trellis Store
//!
//! Persistence collaborator for the fabric controller: CRUD plus
//! filtered-query operations over entities keyed by string id.
//!
//! The engine here is in-memory. Reads run inside a read view and mutations
//! inside a write transaction scope, so a disk-backed engine can slot in
//! behind the same shapes.

pub mod document;
pub mod entities;
pub mod query;

pub use document::{Document, DocumentStore, ReadView, WriteTx};
pub use entities::{RouterRecord, ServiceRecord, Stores, TerminatorRecord};
pub use query::Query;
