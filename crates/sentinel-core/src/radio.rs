//! Short-range radio abstraction consumed by discovery and connection management

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{LinkEvent, ObservedPeer, PeerId};

/// Trait for platform-agnostic radio operations
#[async_trait]
pub trait RadioService: Send + Sync {
    /// Start scanning; observed peers arrive in batches on the returned channel.
    /// Dropping the receiver ends the subscription.
    async fn start_scan(&self) -> Result<mpsc::Receiver<Vec<ObservedPeer>>>;

    /// Stop an ongoing scan
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a device. On success the returned channel carries the
    /// device's connection-state changes until it disconnects.
    async fn connect(&self, peer_id: &PeerId) -> Result<mpsc::Receiver<LinkEvent>>;

    /// Disconnect from a device
    async fn disconnect(&self, peer_id: &PeerId) -> Result<()>;

    /// Write a payload to a connected device. Returns once the transport
    /// acknowledged the write, or once the write completed if it has no
    /// acknowledgement.
    async fn write(&self, peer_id: &PeerId, data: &[u8]) -> Result<()>;
}
