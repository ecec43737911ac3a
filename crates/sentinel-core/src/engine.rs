//! Engine facade: the commands and queries the UI layer talks to

use crate::broadcast::BroadcastProtocol;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::connection::{ConnectAttempt, ConnectionManager};
use crate::discovery::{DiscoveryEngine, ScanStart};
use crate::emergency::{EmergencyActions, EmergencyActivation, EmergencyMode, ShareReport};
use crate::error::{Result, SentinelError};
use crate::events::{EventBus, SentinelEvent};
use crate::location::{LocationSource, PositioningService};
use crate::radio::RadioService;
use crate::types::{ConnectionState, DeliveryRecord, PeerHandle, PeerId, Position, ScanSession};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Sentinel {
    config: EngineConfig,
    events: EventBus,
    location: Arc<LocationSource>,
    discovery: DiscoveryEngine,
    connections: ConnectionManager,
    broadcast: BroadcastProtocol,
    emergency: EmergencyMode,
    tracking: Arc<Mutex<Option<CancellationToken>>>,
}

impl Sentinel {
    pub fn new(
        radio: Arc<dyn RadioService>,
        positioning: Arc<dyn PositioningService>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(radio, positioning, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        radio: Arc<dyn RadioService>,
        positioning: Arc<dyn PositioningService>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let location = Arc::new(LocationSource::new(positioning, events.clone()));
        let discovery = DiscoveryEngine::new(
            Arc::clone(&radio),
            events.clone(),
            config.peer_signature.clone(),
        );
        let connections =
            ConnectionManager::new(Arc::clone(&radio), events.clone(), config.connect_timeout);
        let broadcast = BroadcastProtocol::new(radio, location.last_known(), clock, events.clone());
        let emergency = EmergencyMode::new(
            config.scan_duration,
            config.emergency_grace_period,
            events.clone(),
        );

        Self {
            config,
            events,
            location,
            discovery,
            connections,
            broadcast,
            emergency,
            tracking: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<SentinelEvent> {
        self.events.subscribe()
    }

    // Commands

    /// Start a scan with the configured duration
    pub async fn start_scan(&self) -> Result<ScanStart> {
        self.start_scan_for(self.config.scan_duration).await
    }

    /// Start a scan lasting `duration`. A new session resets connections and
    /// delivery records; a no-op while a session is active.
    pub async fn start_scan_for(&self, duration: Duration) -> Result<ScanStart> {
        let start = self.discovery.start_scan(duration).await?;
        if start.is_started() {
            let torn_down = self.connections.disconnect_all().await;
            let cleared = self.broadcast.clear().await;
            debug!(torn_down, cleared, "Reset state for new scan session");
        }
        Ok(start)
    }

    pub async fn stop_scan(&self) -> Result<bool> {
        self.discovery.stop_scan().await
    }

    /// Connect to a discovered peer and, once connected, push the current
    /// location if it is a Sentinel peer. Returns the delivery record of that
    /// push, or `None` when nothing was pushed.
    pub async fn connect(&self, peer_id: &PeerId) -> Result<Option<DeliveryRecord>> {
        let peer = self
            .discovery
            .peer(peer_id)
            .await
            .ok_or_else(|| SentinelError::PeerNotFound(peer_id.clone()))?;

        match self.connections.connect(peer_id).await? {
            ConnectAttempt::Established => Ok(self.broadcast.on_peer_connected(&peer).await),
            ConnectAttempt::Ignored(state) => {
                debug!(peer_id = %peer_id, state = %state, "Connect had no effect");
                Ok(None)
            }
        }
    }

    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        self.connections.disconnect(peer_id).await
    }

    pub async fn disconnect_all(&self) -> usize {
        self.connections.disconnect_all().await
    }

    /// Connect to every discovered Sentinel peer concurrently. One peer's
    /// failure never blocks the others.
    pub async fn share_with_all_sentinel_peers(&self) -> ShareReport {
        let peers = self.discovery.sentinel_peers().await;
        if peers.is_empty() {
            info!("No Sentinel peers to share with");
            self.events.publish(SentinelEvent::NoPeersToShare);
            return ShareReport::default();
        }

        info!(count = peers.len(), "Sharing location with Sentinel peers");
        let mut tasks = JoinSet::new();
        for peer in peers {
            let engine = self.clone();
            tasks.spawn(async move {
                let result = engine.connect(&peer.id).await;
                (peer.id, result)
            });
        }

        let mut report = ShareReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer_id, result)) => report.record(peer_id, result),
                Err(e) => warn!(error = %e, "Share task failed"),
            }
        }
        report.sorted()
    }

    pub async fn activate_emergency_mode(&self) -> Result<EmergencyActivation> {
        self.emergency.activate(self.clone()).await
    }

    pub async fn deactivate_emergency_mode(&self) -> bool {
        self.emergency.deactivate(self).await
    }

    /// Fetch a fresh fix, requesting location permission once if needed
    pub async fn refresh_location(&self) -> Result<Position> {
        self.location.refresh_location().await
    }

    pub async fn get_current_fix(&self) -> Result<Position> {
        self.location.get_current_fix().await
    }

    /// Keep the last known position updated from the sensor stream. A no-op
    /// while tracking is already running.
    pub async fn start_location_updates(&self) -> Result<()> {
        let mut tracking = self.tracking.lock().await;
        if tracking.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        self.location.start_tracking(cancel.clone()).await?;
        *tracking = Some(cancel);
        info!("Location updates started");
        Ok(())
    }

    pub async fn stop_location_updates(&self) {
        if let Some(cancel) = self.tracking.lock().await.take() {
            cancel.cancel();
            info!("Location updates stopped");
        }
    }

    /// Release every radio and sensor resource held by the engine
    pub async fn shutdown(&self) {
        self.stop_location_updates().await;
        self.deactivate_emergency_mode().await;
        if let Err(e) = self.discovery.stop_scan().await {
            warn!(error = %e, "Failed to stop scan during shutdown");
        }
        self.connections.disconnect_all().await;
        info!("Sentinel engine shut down");
    }

    // Queries

    pub async fn discovered_peers(&self) -> Vec<PeerHandle> {
        self.discovery.discovered_peers().await
    }

    pub async fn sentinel_peers(&self) -> Vec<PeerHandle> {
        self.discovery.sentinel_peers().await
    }

    pub fn connection_state(&self, peer_id: &str) -> ConnectionState {
        self.connections.connection_state(peer_id)
    }

    pub async fn delivery_records(&self) -> Vec<DeliveryRecord> {
        self.broadcast.records().await
    }

    pub async fn delivery_record(&self, peer_id: &str) -> Option<DeliveryRecord> {
        self.broadcast.record_for(peer_id).await
    }

    pub async fn last_known_position(&self) -> Option<Position> {
        self.location.last_known_position().await
    }

    pub async fn is_scanning(&self) -> bool {
        self.discovery.is_scanning().await
    }

    pub async fn current_session(&self) -> Option<ScanSession> {
        self.discovery.current_session().await
    }

    pub async fn is_emergency_active(&self) -> bool {
        self.emergency.is_active().await
    }
}

#[async_trait]
impl EmergencyActions for Sentinel {
    async fn start_scan(&self, duration: Duration) -> Result<ScanStart> {
        self.start_scan_for(duration).await
    }

    async fn share_with_all_sentinel_peers(&self) -> ShareReport {
        Sentinel::share_with_all_sentinel_peers(self).await
    }

    async fn clear_deliveries(&self) {
        self.broadcast.clear().await;
    }
}
