//! Opaque string identifiers used across component boundaries
//!
//! Entities are always referenced by id across crate seams. Direct
//! references (`Arc<Router>`, `Arc<Link>`) are only permitted inside the
//! in-process topology graph for traversal.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identity of a router in the fabric
    RouterId
);

string_id!(
    /// Identity of an inter-router link
    LinkId
);

string_id!(
    /// Identity of an established circuit
    CircuitId
);

string_id!(
    /// Identity of a routable service
    ServiceId
);

string_id!(
    /// Identity of a terminator binding a service to a router
    TerminatorId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_lexically() {
        let a = LinkId::new("l0");
        let b = LinkId::new("l1");
        assert!(a < b);
        assert_eq!(a.as_str(), "l0");
    }

    #[test]
    fn ids_round_trip_serde() {
        let id = RouterId::new("r7");
        let bytes = postcard::to_allocvec(&id).unwrap();
        let back: RouterId = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(id, back);
    }
}
