// In-memory radio and positioning doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sentinel_core::{
    EngineConfig, FixedClock, LinkEvent, ObservedPeer, PeerId, PermissionStatus,
    PositioningService, Position, RadioService, Result, Sentinel, SentinelError, SentinelEvent,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Push time used by every engine built with [`sentinel`]
pub const PUSH_TIME_MILLIS: i64 = 1_700_000_000_000;

#[derive(Default)]
pub struct MockRadio {
    scan_tx: Mutex<Option<mpsc::Sender<Vec<ObservedPeer>>>>,
    scan_failure: Mutex<Option<SentinelError>>,
    scan_starts: AtomicUsize,
    scan_stops: AtomicUsize,
    connects: Mutex<Vec<PeerId>>,
    disconnects: Mutex<Vec<PeerId>>,
    writes: Mutex<Vec<(PeerId, Vec<u8>)>>,
    connect_failures: Mutex<HashMap<PeerId, SentinelError>>,
    unresponsive: Mutex<HashSet<PeerId>>,
    write_failures: Mutex<HashMap<PeerId, String>>,
    links: Mutex<HashMap<PeerId, mpsc::Sender<LinkEvent>>>,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a scan result batch. Returns `false` when no scan is listening.
    pub async fn emit(&self, batch: Vec<ObservedPeer>) -> bool {
        let sender = self.scan_tx.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(batch).await.is_ok(),
            None => false,
        }
    }

    pub fn fail_scan(&self, err: SentinelError) {
        *self.scan_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_connect(&self, peer_id: &str, err: SentinelError) {
        self.connect_failures
            .lock()
            .unwrap()
            .insert(peer_id.to_string(), err);
    }

    pub fn clear_connect_failure(&self, peer_id: &str) {
        self.connect_failures.lock().unwrap().remove(peer_id);
    }

    /// Connect attempts to this peer never complete
    pub fn make_unresponsive(&self, peer_id: &str) {
        self.unresponsive
            .lock()
            .unwrap()
            .insert(peer_id.to_string());
    }

    pub fn fail_write(&self, peer_id: &str, details: &str) {
        self.write_failures
            .lock()
            .unwrap()
            .insert(peer_id.to_string(), details.to_string());
    }

    /// Simulate the peer going out of range
    pub fn drop_link(&self, peer_id: &str) -> bool {
        match self.links.lock().unwrap().remove(peer_id) {
            Some(link) => link.try_send(LinkEvent::Disconnected).is_ok(),
            None => false,
        }
    }

    pub fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    pub fn scan_stops(&self) -> usize {
        self.scan_stops.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> Vec<PeerId> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<PeerId> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RadioService for MockRadio {
    async fn start_scan(&self) -> Result<mpsc::Receiver<Vec<ObservedPeer>>> {
        if let Some(err) = self.scan_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.scan_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scan_stops.fetch_add(1, Ordering::SeqCst);
        self.scan_tx.lock().unwrap().take();
        Ok(())
    }

    async fn connect(&self, peer_id: &PeerId) -> Result<mpsc::Receiver<LinkEvent>> {
        self.connects.lock().unwrap().push(peer_id.clone());

        if let Some(err) = self.connect_failures.lock().unwrap().get(peer_id).cloned() {
            return Err(err);
        }
        let unresponsive = self.unresponsive.lock().unwrap().contains(peer_id);
        if unresponsive {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::channel(4);
        self.links.lock().unwrap().insert(peer_id.clone(), tx);
        Ok(rx)
    }

    async fn disconnect(&self, peer_id: &PeerId) -> Result<()> {
        self.disconnects.lock().unwrap().push(peer_id.clone());
        self.links.lock().unwrap().remove(peer_id);
        Ok(())
    }

    async fn write(&self, peer_id: &PeerId, data: &[u8]) -> Result<()> {
        if let Some(details) = self.write_failures.lock().unwrap().get(peer_id).cloned() {
            return Err(SentinelError::WriteFailure(details));
        }
        self.writes
            .lock()
            .unwrap()
            .push((peer_id.clone(), data.to_vec()));
        Ok(())
    }
}

pub struct MockPositioning {
    status: Mutex<PermissionStatus>,
    status_after_request: Mutex<PermissionStatus>,
    fix: Mutex<Option<Position>>,
    stream_tx: Mutex<Option<mpsc::Sender<Position>>>,
    requests: AtomicUsize,
    streams_opened: AtomicUsize,
}

impl MockPositioning {
    pub fn new(status: PermissionStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            status_after_request: Mutex::new(status),
            fix: Mutex::new(None),
            stream_tx: Mutex::new(None),
            requests: AtomicUsize::new(0),
            streams_opened: AtomicUsize::new(0),
        })
    }

    /// Granted, with a fix at the given coordinates
    pub fn granted_at(latitude: f64, longitude: f64) -> Arc<Self> {
        let positioning = Self::new(PermissionStatus::Granted);
        positioning.set_fix(latitude, longitude);
        positioning
    }

    /// The status the user picks when prompted
    pub fn answer_prompt_with(&self, status: PermissionStatus) {
        *self.status_after_request.lock().unwrap() = status;
    }

    pub fn set_fix(&self, latitude: f64, longitude: f64) {
        *self.fix.lock().unwrap() = Some(Position::new(latitude, longitude, Utc::now()));
    }

    /// Push a fix into the open stream. Returns `false` when nobody listens.
    pub async fn push_fix(&self, latitude: f64, longitude: f64) -> bool {
        let sender = self.stream_tx.lock().unwrap().clone();
        match sender {
            Some(sender) => sender
                .send(Position::new(latitude, longitude, Utc::now()))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Close the open fix stream, as a sensor that stops reporting would
    pub fn end_stream(&self) {
        self.stream_tx.lock().unwrap().take();
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositioningService for MockPositioning {
    async fn check_permission(&self) -> PermissionStatus {
        *self.status.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let answer = *self.status_after_request.lock().unwrap();
        *self.status.lock().unwrap() = answer;
        answer
    }

    async fn current_fix(&self) -> Result<Position> {
        self.fix
            .lock()
            .unwrap()
            .ok_or_else(|| SentinelError::PositionUnavailable("no satellites".to_string()))
    }

    async fn fix_stream(&self) -> Result<mpsc::Receiver<Position>> {
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.stream_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

/// Engine over the given doubles, with the push time pinned to [`PUSH_TIME_MILLIS`]
pub fn sentinel(radio: Arc<MockRadio>, positioning: Arc<MockPositioning>) -> Sentinel {
    let clock = FixedClock(Utc.timestamp_millis_opt(PUSH_TIME_MILLIS).unwrap());
    Sentinel::with_clock(radio, positioning, Arc::new(clock), EngineConfig::default())
}

pub fn observed(id: &str, name: Option<&str>) -> ObservedPeer {
    ObservedPeer::new(id, name)
}

/// Let spawned tasks run until they are all waiting again
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Everything published so far
pub fn drain(events: &mut broadcast::Receiver<SentinelEvent>) -> Vec<SentinelEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
