//! Persistent entity records
//!
//! These are the durable shapes of the data model. Live connectivity state
//! (control channels, link state histories) never lands here; it belongs to
//! the topology layer. Terminator precedence and dynamic cost live in the
//! cost table, not on the record.

use serde::{Deserialize, Serialize};
use trellis_core::{PeerData, RouterId, ServiceId, TerminatorId};

use crate::document::{Document, DocumentStore};

/// Durable router record, created when a router first authenticates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterRecord {
    pub id: RouterId,
    pub fingerprint: String,
}

impl Document for RouterRecord {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn field_values(&self, field: &str) -> Vec<String> {
        match field {
            "fingerprint" => vec![self.fingerprint.clone()],
            _ => vec![],
        }
    }
}

/// A named routable destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub name: String,
}

impl Document for ServiceRecord {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn field_values(&self, field: &str) -> Vec<String> {
        match field {
            "name" => vec![self.name.clone()],
            _ => vec![],
        }
    }
}

/// A service endpoint binding living on a specific router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatorRecord {
    pub id: TerminatorId,
    pub service: ServiceId,
    pub router: RouterId,
    /// Data-plane binding; inferred from the address when left empty.
    pub binding: String,
    pub address: String,
    pub cost: u16,
    /// Static peer data handed to the egress hop during route setup.
    #[serde(default)]
    pub peer_data: PeerData,
}

impl TerminatorRecord {
    /// Infer the binding from the address when none was given: `udp:`
    /// addresses bind udp, `hosted` addresses bind edge, everything else
    /// binds transport.
    pub fn effective_binding(&self) -> &str {
        if !self.binding.is_empty() {
            return &self.binding;
        }
        if self.address.starts_with("udp:") {
            "udp"
        } else if self.address.starts_with("hosted") {
            "edge"
        } else {
            "transport"
        }
    }
}

impl Document for TerminatorRecord {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn field_values(&self, field: &str) -> Vec<String> {
        match field {
            "service" => vec![self.service.to_string()],
            "router" => vec![self.router.to_string()],
            "binding" => vec![self.binding.clone()],
            "address" => vec![self.address.clone()],
            _ => vec![],
        }
    }
}

/// The controller's entity collections
#[derive(Default)]
pub struct Stores {
    pub routers: DocumentStore<RouterRecord>,
    pub services: DocumentStore<ServiceRecord>,
    pub terminators: DocumentStore<TerminatorRecord>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// All terminators bound to a service.
    pub fn terminators_for_service(&self, service: &ServiceId) -> Vec<TerminatorRecord> {
        self.terminators
            .query(&crate::query::Query::all().field_eq("service", service.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminator(id: &str, service: &str, address: &str, binding: &str) -> TerminatorRecord {
        TerminatorRecord {
            id: TerminatorId::new(id),
            service: ServiceId::new(service),
            router: RouterId::new("r1"),
            binding: binding.to_string(),
            address: address.to_string(),
            cost: 0,
            peer_data: PeerData::new(),
        }
    }

    #[test]
    fn terminators_for_service_filters() {
        let stores = Stores::new();
        stores
            .terminators
            .create(terminator("t1", "svc1", "tcp:one", ""))
            .unwrap();
        stores
            .terminators
            .create(terminator("t2", "svc2", "tcp:two", ""))
            .unwrap();
        stores
            .terminators
            .create(terminator("t3", "svc1", "tcp:three", ""))
            .unwrap();

        let found = stores.terminators_for_service(&ServiceId::new("svc1"));
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|t| t.service.as_str() == "svc1"));
    }

    #[test]
    fn binding_inference_follows_address_prefix() {
        assert_eq!(terminator("t", "s", "udp:0.0.0.0:53", "").effective_binding(), "udp");
        assert_eq!(terminator("t", "s", "hosted:abc", "").effective_binding(), "edge");
        assert_eq!(terminator("t", "s", "tcp:1.2.3.4:80", "").effective_binding(), "transport");
        assert_eq!(terminator("t", "s", "udp:0.0.0.0:53", "edge").effective_binding(), "edge");
    }
}
