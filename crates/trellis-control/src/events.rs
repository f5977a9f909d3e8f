//! Lifecycle event stream
//!
//! Administrative surfaces subscribe here for live circuit and router
//! presence events. Broadcast semantics: a lagging subscriber misses
//! events rather than ever blocking the control plane.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use trellis_core::{CircuitId, RouterId, ServiceId};

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    RouterConnected {
        router: RouterId,
        timestamp: DateTime<Utc>,
    },
    RouterDisconnected {
        router: RouterId,
        timestamp: DateTime<Utc>,
    },
    CircuitCreated {
        circuit: CircuitId,
        client: String,
        service: ServiceId,
        path: String,
        timestamp: DateTime<Utc>,
    },
    CircuitUpdated {
        circuit: CircuitId,
        path: String,
        timestamp: DateTime<Utc>,
    },
    CircuitRemoved {
        circuit: CircuitId,
        timestamp: DateTime<Utc>,
    },
}

/// Fan-out of [`NetworkEvent`]s to any number of subscribers
pub struct EventBus {
    tx: broadcast::Sender<NetworkEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }

    /// Publish, dropping the event when nobody is listening.
    pub fn publish(&self, event: NetworkEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(NetworkEvent::RouterConnected {
            router: RouterId::new("r1"),
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            NetworkEvent::RouterConnected { router, .. } => assert_eq!(router.as_str(), "r1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(NetworkEvent::CircuitRemoved {
            circuit: CircuitId::new("c1"),
            timestamp: Utc::now(),
        });
    }
}
