use crate::error::{Result, SentinelError};
use crate::radio::RadioService;
use crate::types::{LinkEvent, ObservedPeer, PeerId};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Characteristic Sentinel peers expose for incoming location lines
pub const LOCATION_CHARACTERISTIC_UUID: uuid::Uuid = uuid::Uuid::from_bytes([
    0x00, 0x00, 0xFF, 0xF1, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
]);

/// How often the adapter's peripheral list is sampled into a result batch
const SCAN_POLL_INTERVAL: Duration = Duration::from_secs(1);

const SCAN_CHANNEL_CAPACITY: usize = 32;
const LINK_CHANNEL_CAPACITY: usize = 4;

/// Radio backed by the host's first Bluetooth LE adapter
pub struct BtleRadio {
    adapter: Adapter,
    peripherals: Arc<DashMap<PeerId, Peripheral>>,
    scan_task: Mutex<Option<CancellationToken>>,
    link_watchers: DashMap<PeerId, CancellationToken>,
}

impl BtleRadio {
    /// Open the first available adapter
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| {
            SentinelError::RadioUnavailable(format!("Failed to create BLE manager: {}", e))
        })?;

        let adapters = manager.adapters().await.map_err(|e| {
            SentinelError::RadioUnavailable(format!("Failed to get BLE adapters: {}", e))
        })?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| SentinelError::RadioUnavailable("No BLE adapter found".to_string()))?;

        info!("BLE adapter initialized: {:?}", adapter.adapter_info().await);

        Ok(Self {
            adapter,
            peripherals: Arc::new(DashMap::new()),
            scan_task: Mutex::new(None),
            link_watchers: DashMap::new(),
        })
    }

    fn peripheral(&self, peer_id: &PeerId) -> Result<Peripheral> {
        self.peripherals
            .get(peer_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| SentinelError::PeerNotFound(peer_id.clone()))
    }

    /// Sample every known peripheral into one batch
    async fn sample_peripherals(
        adapter: &Adapter,
        peripherals: &DashMap<PeerId, Peripheral>,
    ) -> Result<Vec<ObservedPeer>> {
        let found = adapter.peripherals().await.map_err(|e| {
            SentinelError::Radio(format!("Failed to get peripherals: {}", e))
        })?;

        let mut batch = Vec::with_capacity(found.len());
        for peripheral in found {
            let name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                Ok(None) => None,
                Err(e) => {
                    debug!("Error reading peripheral properties: {}", e);
                    continue;
                }
            };

            let peer_id = peripheral.address().to_string();
            peripherals.insert(peer_id.clone(), peripheral);
            batch.push(ObservedPeer { id: peer_id, name });
        }
        Ok(batch)
    }
}

#[async_trait]
impl RadioService for BtleRadio {
    async fn start_scan(&self) -> Result<mpsc::Receiver<Vec<ObservedPeer>>> {
        info!("Starting BLE scan");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| SentinelError::RadioUnavailable(format!("Failed to start BLE scan: {}", e)))?;

        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        if let Some(previous) = self.scan_task.lock().await.replace(cancel.clone()) {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        let peripherals = Arc::clone(&self.peripherals);
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(SCAN_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = poll.tick() => {
                        match Self::sample_peripherals(&adapter, &peripherals).await {
                            Ok(batch) if batch.is_empty() => {}
                            Ok(batch) => {
                                if tx.send(batch).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Error processing BLE scan results: {}", e);
                            }
                        }
                    }
                }
            }
            debug!("BLE scan result task terminated");
        });

        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(cancel) = self.scan_task.lock().await.take() {
            cancel.cancel();
        }

        info!("Stopping BLE scan");
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| SentinelError::Radio(format!("Failed to stop BLE scan: {}", e)))
    }

    async fn connect(&self, peer_id: &PeerId) -> Result<mpsc::Receiver<LinkEvent>> {
        info!("Connecting to device: {}", peer_id);

        let peripheral = self.peripheral(peer_id)?;
        let mut adapter_events = self.adapter.events().await.map_err(|e| {
            SentinelError::Radio(format!("Failed to subscribe to adapter events: {}", e))
        })?;

        peripheral
            .connect()
            .await
            .map_err(|e| map_connect_error(peer_id, e))?;

        if let Err(e) = peripheral.discover_services().await {
            if let Err(release) = peripheral.disconnect().await {
                debug!("Disconnect after failed service discovery: {}", release);
            }
            return Err(SentinelError::ConnectionRejected(format!(
                "Service discovery failed: {}",
                e
            )));
        }

        let (tx, rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        if let Some(previous) = self.link_watchers.insert(peer_id.clone(), cancel.clone()) {
            previous.cancel();
        }

        let device = peripheral.id();
        let watched = peer_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    event = adapter_events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == device => {
                            warn!("Device disconnected: {}", watched);
                            let _ = tx.send(LinkEvent::Disconnected).await;
                            break;
                        }
                        Some(CentralEvent::DeviceConnected(id)) if id == device => {
                            let _ = tx.send(LinkEvent::Connected).await;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!("Link watcher for {} terminated", watched);
        });

        info!("Successfully connected to device: {}", peer_id);
        Ok(rx)
    }

    async fn disconnect(&self, peer_id: &PeerId) -> Result<()> {
        info!("Disconnecting from device: {}", peer_id);

        if let Some((_, cancel)) = self.link_watchers.remove(peer_id) {
            cancel.cancel();
        }

        let peripheral = self.peripheral(peer_id)?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| SentinelError::Radio(format!("Disconnect failed: {}", e)))
    }

    async fn write(&self, peer_id: &PeerId, data: &[u8]) -> Result<()> {
        debug!("Sending {} bytes to device: {}", data.len(), peer_id);

        let peripheral = self.peripheral(peer_id)?;

        let is_connected = peripheral
            .is_connected()
            .await
            .map_err(|e| SentinelError::WriteFailure(format!("Connection check failed: {}", e)))?;
        if !is_connected {
            return Err(SentinelError::WriteFailure(format!(
                "Device {} is not connected",
                peer_id
            )));
        }

        let characteristics = peripheral.characteristics();
        let (characteristic, write_type) = select_write_characteristic(&characteristics)
            .ok_or_else(|| {
                SentinelError::WriteFailure("No writable characteristic found".to_string())
            })?;

        peripheral
            .write(characteristic, data, write_type)
            .await
            .map_err(|e| SentinelError::WriteFailure(e.to_string()))?;

        debug!("Successfully sent {} bytes to device {}", data.len(), peer_id);
        Ok(())
    }
}

/// Prefer the location characteristic, then any acknowledged write, then
/// any unacknowledged write.
fn select_write_characteristic(
    characteristics: &BTreeSet<Characteristic>,
) -> Option<(&Characteristic, WriteType)> {
    let write_type = |c: &Characteristic| {
        if c.properties.contains(CharPropFlags::WRITE) {
            Some(WriteType::WithResponse)
        } else if c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            Some(WriteType::WithoutResponse)
        } else {
            None
        }
    };

    characteristics
        .iter()
        .filter(|c| c.uuid == LOCATION_CHARACTERISTIC_UUID)
        .find_map(|c| write_type(c).map(|w| (c, w)))
        .or_else(|| {
            characteristics
                .iter()
                .find(|c| c.properties.contains(CharPropFlags::WRITE))
                .map(|c| (c, WriteType::WithResponse))
        })
        .or_else(|| {
            characteristics
                .iter()
                .find_map(|c| write_type(c).map(|w| (c, w)))
        })
}

fn map_connect_error(peer_id: &PeerId, err: btleplug::Error) -> SentinelError {
    match err {
        btleplug::Error::TimedOut(after) => {
            SentinelError::ConnectionTimeout(format!("{} after {:?}", peer_id, after))
        }
        btleplug::Error::PermissionDenied => {
            SentinelError::RadioUnavailable("Bluetooth permission denied".to_string())
        }
        btleplug::Error::NotSupported(what) => SentinelError::RadioUnavailable(what),
        btleplug::Error::DeviceNotFound => SentinelError::PeerNotFound(peer_id.clone()),
        other => SentinelError::ConnectionRejected(format!("{}: {}", peer_id, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_connect_timeout() {
        let err = map_connect_error(
            &"AA:BB".to_string(),
            btleplug::Error::TimedOut(Duration::from_secs(5)),
        );
        assert!(matches!(err, SentinelError::ConnectionTimeout(_)));
    }

    #[test]
    fn test_map_connect_permission() {
        let err = map_connect_error(&"AA:BB".to_string(), btleplug::Error::PermissionDenied);
        assert!(matches!(err, SentinelError::RadioUnavailable(_)));
    }

    #[test]
    fn test_map_connect_other() {
        let err = map_connect_error(&"AA:BB".to_string(), btleplug::Error::NotConnected);
        assert!(matches!(err, SentinelError::ConnectionRejected(_)));
    }

    #[test]
    fn test_no_writable_characteristic() {
        assert!(select_write_characteristic(&BTreeSet::new()).is_none());
    }

    #[tokio::test]
    async fn test_radio_creation() {
        // Hosts without a Bluetooth adapter report the radio as unavailable
        if let Err(e) = BtleRadio::new().await {
            assert!(matches!(e, SentinelError::RadioUnavailable(_)));
        }
    }
}
