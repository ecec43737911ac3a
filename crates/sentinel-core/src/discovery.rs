// Peer Discovery Engine - bounded scan sessions and the discovered-peer set

use crate::error::{ErrorContext, Result, SentinelError};
use crate::events::{EventBus, SentinelEvent};
use crate::radio::RadioService;
use crate::types::{ObservedPeer, PeerHandle, PeerId, ScanSession};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Discovered peers in first-seen order, unique by id
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Vec<PeerHandle>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert every peer of `batch` whose id is not yet known. Known peers keep
    /// their first-seen name and tag. Returns the number of peers added.
    pub fn merge(&mut self, batch: &[ObservedPeer], signature: &str) -> usize {
        let mut added = 0;
        for observed in batch {
            if self.contains(&observed.id) {
                continue;
            }
            self.peers.push(PeerHandle::new(
                observed.id.clone(),
                observed.display_name(),
                signature,
            ));
            added += 1;
        }
        added
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.iter().any(|peer| peer.id == peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerHandle> {
        self.peers.iter().find(|peer| peer.id == peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerHandle> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn to_vec(&self) -> Vec<PeerHandle> {
        self.peers.clone()
    }
}

/// Result of a scan start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    Started(ScanSession),
    /// A session was already running; nothing changed
    AlreadyActive(ScanSession),
}

impl ScanStart {
    pub fn session(&self) -> ScanSession {
        match self {
            ScanStart::Started(session) | ScanStart::AlreadyActive(session) => *session,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, ScanStart::Started(_))
    }
}

enum ScanState {
    Idle,
    Scanning {
        session: ScanSession,
        cancel: CancellationToken,
    },
}

#[derive(Clone)]
pub struct DiscoveryEngine {
    radio: Arc<dyn RadioService>,
    state: Arc<Mutex<ScanState>>,
    discovered_peers: Arc<RwLock<PeerSet>>,
    events: EventBus,
    signature: String,
}

impl DiscoveryEngine {
    pub fn new(radio: Arc<dyn RadioService>, events: EventBus, signature: String) -> Self {
        Self {
            radio,
            state: Arc::new(Mutex::new(ScanState::Idle)),
            discovered_peers: Arc::new(RwLock::new(PeerSet::new())),
            events,
            signature,
        }
    }

    /// Start a scan session lasting `duration`. A no-op while a session is
    /// active. Clears the discovered-peer set and stops automatically at the
    /// deadline.
    pub async fn start_scan(&self, duration: Duration) -> Result<ScanStart> {
        let span = chrono::Duration::from_std(duration)
            .map_err(|e| SentinelError::InvalidInput(format!("scan duration: {}", e)))?;
        let started_at = Utc::now();
        let deadline = started_at.checked_add_signed(span).ok_or_else(|| {
            SentinelError::InvalidInput(format!("scan duration too long: {:?}", duration))
        })?;

        let mut state = self.state.lock().await;
        if let ScanState::Scanning { session, .. } = &*state {
            debug!(session_id = %session.session_id, "Scan already active");
            return Ok(ScanStart::AlreadyActive(*session));
        }

        let results = self.radio.start_scan().await.map_err(|e| {
            e.log_with_context(&ErrorContext::new().with_operation("start_scan"));
            e
        })?;

        self.discovered_peers.write().await.clear();

        let session = ScanSession {
            session_id: Uuid::new_v4(),
            started_at,
            deadline,
        };
        let cancel = CancellationToken::new();
        *state = ScanState::Scanning {
            session,
            cancel: cancel.clone(),
        };
        drop(state);

        info!(
            session_id = %session.session_id,
            duration_secs = duration.as_secs_f64(),
            "Scan started"
        );
        self.events.publish(SentinelEvent::PeersChanged { peers: Vec::new() });
        self.events.publish(SentinelEvent::ScanStateChanged {
            scanning: true,
            session: Some(session),
        });

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_session(session, results, cancel, duration).await;
        });

        Ok(ScanStart::Started(session))
    }

    /// Stop the active scan. Returns `false` when no scan was running.
    pub async fn stop_scan(&self) -> Result<bool> {
        self.finish_session(None).await
    }

    /// Merge a batch of scan results into the discovered-peer set. Ignored
    /// when no scan is active.
    pub async fn on_scan_result(&self, batch: Vec<ObservedPeer>) -> usize {
        if !self.is_scanning().await {
            debug!(count = batch.len(), "Dropping scan results outside a session");
            return 0;
        }
        self.merge_batch(&batch).await
    }

    pub async fn discovered_peers(&self) -> Vec<PeerHandle> {
        self.discovered_peers.read().await.to_vec()
    }

    pub async fn sentinel_peers(&self) -> Vec<PeerHandle> {
        self.discovered_peers
            .read()
            .await
            .iter()
            .filter(|peer| peer.is_sentinel_peer)
            .cloned()
            .collect()
    }

    pub async fn peer(&self, peer_id: &PeerId) -> Option<PeerHandle> {
        self.discovered_peers.read().await.get(peer_id).cloned()
    }

    pub async fn is_scanning(&self) -> bool {
        matches!(*self.state.lock().await, ScanState::Scanning { .. })
    }

    pub async fn current_session(&self) -> Option<ScanSession> {
        match &*self.state.lock().await {
            ScanState::Idle => None,
            ScanState::Scanning { session, .. } => Some(*session),
        }
    }

    async fn merge_batch(&self, batch: &[ObservedPeer]) -> usize {
        let (added, snapshot) = {
            let mut peers = self.discovered_peers.write().await;
            let added = peers.merge(batch, &self.signature);
            (added, peers.to_vec())
        };

        if added > 0 {
            debug!(added, total = snapshot.len(), "Discovered new peers");
            self.events
                .publish(SentinelEvent::PeersChanged { peers: snapshot });
        }
        added
    }

    /// Pump scan results until the deadline or cancellation. The result
    /// receiver is dropped on every exit path.
    async fn run_session(
        &self,
        session: ScanSession,
        mut results: mpsc::Receiver<Vec<ObservedPeer>>,
        cancel: CancellationToken,
        duration: Duration,
    ) {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut stream_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(session_id = %session.session_id, "Scan session cancelled");
                    return;
                }
                _ = &mut deadline => {
                    info!(session_id = %session.session_id, "Scan deadline reached");
                    break;
                }
                batch = results.recv(), if stream_open => match batch {
                    Some(batch) => {
                        self.merge_batch(&batch).await;
                    }
                    None => {
                        debug!(session_id = %session.session_id, "Radio closed scan result stream");
                        stream_open = false;
                    }
                },
            }
        }

        drop(results);
        if let Err(e) = self.finish_session(Some(session.session_id)).await {
            warn!(session_id = %session.session_id, error = %e, "Failed to stop scan at deadline");
        }
    }

    /// Tear down the active session, or only the session `expected` when given
    async fn finish_session(&self, expected: Option<Uuid>) -> Result<bool> {
        let mut state = self.state.lock().await;
        let session = match &*state {
            ScanState::Idle => {
                debug!("No active scan to stop");
                return Ok(false);
            }
            ScanState::Scanning { session, .. }
                if expected.is_some_and(|id| id != session.session_id) =>
            {
                return Ok(false);
            }
            ScanState::Scanning { session, cancel } => {
                cancel.cancel();
                *session
            }
        };
        *state = ScanState::Idle;
        drop(state);

        let stopped = self.radio.stop_scan().await;
        if let Err(e) = &stopped {
            e.log_with_context(
                &ErrorContext::new()
                    .with_session_id(session.session_id)
                    .with_operation("stop_scan"),
            );
        }

        let peer_count = self.discovered_peers.read().await.len();
        info!(session_id = %session.session_id, peer_count, "Scan stopped");
        self.events.publish(SentinelEvent::ScanStateChanged {
            scanning: false,
            session: None,
        });

        stopped.map(|_| true)
    }
}
