use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ConnectionState, DeliveryOutcome, PeerHandle, PeerId, Position, ScanSession};

/// Events published by the core for UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SentinelEvent {
    PeersChanged {
        peers: Vec<PeerHandle>,
    },
    ScanStateChanged {
        scanning: bool,
        session: Option<ScanSession>,
    },
    ConnectionStateChanged {
        peer_id: PeerId,
        state: ConnectionState,
        message: Option<String>,
    },
    DeliveryChanged {
        peer_id: PeerId,
        outcome: DeliveryOutcome,
        message: Option<String>,
    },
    /// Every delivery record was dropped
    DeliveriesCleared {
        cleared: usize,
    },
    PositionChanged {
        position: Position,
    },
    NoPeersToShare,
    EmergencyModeChanged {
        active: bool,
    },
}

/// Fan-out channel shared by every component
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SentinelEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SentinelEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SentinelEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
