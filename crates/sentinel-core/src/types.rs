use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureReason;

/// Stable identifier of a peer as reported by the radio
pub type PeerId = String;

/// Signature a peer's advertised name must contain to be treated as a Sentinel peer
pub const DEFAULT_PEER_SIGNATURE: &str = "sentinel";

/// Display name used when a peer advertises no name
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

/// A single geographic fix. Superseded by later fixes, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }
}

/// A peer as first observed during a scan session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHandle {
    pub id: PeerId,
    pub display_name: String,
    pub is_sentinel_peer: bool,
    pub discovered_at: DateTime<Utc>,
}

impl PeerHandle {
    /// Build a handle, tagging it as a Sentinel peer when the name contains
    /// `signature` (case-insensitive).
    pub fn new(id: PeerId, display_name: String, signature: &str) -> Self {
        let is_sentinel_peer = matches_signature(&display_name, signature);
        Self {
            id,
            display_name,
            is_sentinel_peer,
            discovered_at: Utc::now(),
        }
    }
}

/// Case-insensitive substring match of a peer name against the app signature
pub fn matches_signature(name: &str, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&signature.to_lowercase())
}

/// A peer sighting delivered by the radio in a scan-result batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedPeer {
    pub id: PeerId,
    pub name: Option<String>,
}

impl ObservedPeer {
    pub fn new(id: impl Into<PeerId>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => UNKNOWN_DEVICE_NAME.to_string(),
        }
    }
}

/// One bounded-duration discovery window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Per-peer connection state owned by the connection manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(FailureReason),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

/// Inputs driving the per-peer connection state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    ConnectRequested,
    Established,
    Failed(FailureReason),
    Dropped,
    TornDown,
}

impl ConnectionState {
    /// Pure transition function. `None` means the input has no effect in the
    /// current state.
    pub fn on(&self, input: &LinkInput) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, input) {
            (Disconnected | Failed(_), LinkInput::ConnectRequested) => Some(Connecting),
            (Connecting, LinkInput::Established) => Some(Connected),
            (Connecting, LinkInput::Failed(reason)) => Some(Failed(reason.clone())),
            (Connected, LinkInput::Dropped) => Some(Disconnected),
            (Connecting | Connected | Failed(_), LinkInput::TornDown) => Some(Disconnected),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Link-level notifications on a per-device connection-state stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
}

/// Location payload pushed to peers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub epoch_millis: i64,
}

/// Outcome of the latest push to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason")]
pub enum DeliveryOutcome {
    Pending,
    Delivered,
    Failed(FailureReason),
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Pending => write!(f, "Pending"),
            DeliveryOutcome::Delivered => write!(f, "Delivered"),
            DeliveryOutcome::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

/// Latest share state for one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub peer_id: PeerId,
    /// `None` when no position was available to build a payload from
    pub payload: Option<LocationPayload>,
    pub outcome: DeliveryOutcome,
    pub delivered_at: DateTime<Utc>,
    /// Kept across overwrites so display order stays stable
    pub first_attempt_at: DateTime<Utc>,
}
