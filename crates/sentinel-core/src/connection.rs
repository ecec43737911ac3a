// Connection Manager - per-peer connection lifecycle, decoupled from discovery

use crate::error::{ErrorContext, FailureReason, Result, SentinelError};
use crate::events::{EventBus, SentinelEvent};
use crate::radio::RadioService;
use crate::types::{ConnectionState, LinkEvent, LinkInput, PeerId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a connect request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAttempt {
    /// The peer moved to `Connected` as a result of this call
    Established,
    /// The request had no effect; carries the state at the time
    Ignored(ConnectionState),
}

/// Registered watcher for one live link
struct LinkWatcher {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ConnectionManager {
    radio: Arc<dyn RadioService>,
    states: Arc<DashMap<PeerId, ConnectionState>>,
    link_watchers: Arc<DashMap<PeerId, LinkWatcher>>,
    next_watcher_id: Arc<AtomicU64>,
    events: EventBus,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(radio: Arc<dyn RadioService>, events: EventBus, connect_timeout: Duration) -> Self {
        Self {
            radio,
            states: Arc::new(DashMap::new()),
            link_watchers: Arc::new(DashMap::new()),
            next_watcher_id: Arc::new(AtomicU64::new(0)),
            events,
            connect_timeout,
        }
    }

    /// Current state of a peer; `Disconnected` for unknown peers
    pub fn connection_state(&self, peer_id: &str) -> ConnectionState {
        self.states
            .get(peer_id)
            .map(|state| state.value().clone())
            .unwrap_or_default()
    }

    /// Peers currently `Connecting` or `Connected`
    pub fn active_peers(&self) -> Vec<PeerId> {
        self.states
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Connect to a peer once. A no-op while the peer is `Connecting` or
    /// `Connected`. Failures are recorded and returned, never retried.
    pub async fn connect(&self, peer_id: &PeerId) -> Result<ConnectAttempt> {
        {
            let mut state = self
                .states
                .entry(peer_id.clone())
                .or_insert(ConnectionState::Disconnected);
            match state.on(&LinkInput::ConnectRequested) {
                Some(next) => *state = next,
                None => {
                    let current = state.value().clone();
                    debug!(peer_id = %peer_id, state = %current, "Connect ignored");
                    return Ok(ConnectAttempt::Ignored(current));
                }
            }
        }
        self.publish_state(peer_id, ConnectionState::Connecting, None);
        info!(peer_id = %peer_id, "Connecting to peer");

        let outcome = tokio::time::timeout(self.connect_timeout, self.radio.connect(peer_id))
            .await
            .unwrap_or_else(|_| {
                Err(SentinelError::ConnectionTimeout(format!(
                    "no response from {} within {}s",
                    peer_id,
                    self.connect_timeout.as_secs()
                )))
            });

        match outcome {
            Ok(link_events) => self.on_established(peer_id, link_events).await,
            Err(e) => {
                if matches!(e, SentinelError::ConnectionTimeout(_)) {
                    // The radio may still hold a half-open attempt.
                    if let Err(release) = self.radio.disconnect(peer_id).await {
                        debug!(peer_id = %peer_id, error = %release, "Release after timeout failed");
                    }
                }
                let reason = FailureReason::from(&e);
                e.log_with_context(
                    &ErrorContext::new()
                        .with_peer_id(peer_id.clone())
                        .with_operation("connect"),
                );
                if let Some(state) = self.apply(peer_id, &LinkInput::Failed(reason.clone())) {
                    self.publish_state(peer_id, state, Some(reason.user_message()));
                }
                Err(e)
            }
        }
    }

    async fn on_established(
        &self,
        peer_id: &PeerId,
        link_events: mpsc::Receiver<LinkEvent>,
    ) -> Result<ConnectAttempt> {
        match self.apply(peer_id, &LinkInput::Established) {
            Some(state) => {
                let cancel = CancellationToken::new();
                let watcher_id = self.next_watcher_id.fetch_add(1, Ordering::Relaxed);
                let watcher = LinkWatcher {
                    id: watcher_id,
                    cancel: cancel.clone(),
                };
                if let Some(previous) = self.link_watchers.insert(peer_id.clone(), watcher) {
                    previous.cancel.cancel();
                }
                let manager = self.clone();
                let watched = peer_id.clone();
                tokio::spawn(async move {
                    manager
                        .watch_link(watched, watcher_id, link_events, cancel)
                        .await;
                });

                info!(peer_id = %peer_id, "Peer connected");
                self.publish_state(peer_id, state, None);
                Ok(ConnectAttempt::Established)
            }
            None => {
                // Torn down while the attempt was in flight.
                let current = self.connection_state(peer_id);
                warn!(peer_id = %peer_id, state = %current, "Connection completed after teardown, releasing");
                if let Err(e) = self.radio.disconnect(peer_id).await {
                    debug!(peer_id = %peer_id, error = %e, "Release of late connection failed");
                }
                Ok(ConnectAttempt::Ignored(current))
            }
        }
    }

    /// Tear down one peer's connection. Returns `false` when it was already
    /// disconnected.
    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        if let Some((_, watcher)) = self.link_watchers.remove(peer_id) {
            watcher.cancel.cancel();
        }

        let previous = self.connection_state(peer_id);
        let Some(state) = self.apply(peer_id, &LinkInput::TornDown) else {
            return false;
        };

        if previous.is_active() {
            if let Err(e) = self.radio.disconnect(peer_id).await {
                e.log_with_context(
                    &ErrorContext::new()
                        .with_peer_id(peer_id.clone())
                        .with_operation("disconnect"),
                );
            }
        }

        info!(peer_id = %peer_id, "Peer disconnected");
        self.publish_state(peer_id, state, None);
        true
    }

    /// Tear down every connection that is not already `Disconnected`. Returns
    /// the number of peers torn down.
    pub async fn disconnect_all(&self) -> usize {
        let peers: Vec<PeerId> = self
            .states
            .iter()
            .filter(|entry| *entry.value() != ConnectionState::Disconnected)
            .map(|entry| entry.key().clone())
            .collect();

        let mut torn_down = 0;
        for peer_id in &peers {
            if self.disconnect(peer_id).await {
                torn_down += 1;
            }
        }

        if torn_down > 0 {
            info!(torn_down, "Disconnected all peers");
        }
        torn_down
    }

    /// Follow a peer's link events until it drops or the watcher is cancelled.
    /// A drop only counts while this watcher is still the registered one.
    async fn watch_link(
        &self,
        peer_id: PeerId,
        watcher_id: u64,
        mut link_events: mpsc::Receiver<LinkEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(peer_id = %peer_id, "Link watcher cancelled");
                    return;
                }
                event = link_events.recv() => match event {
                    Some(LinkEvent::Connected) => continue,
                    Some(LinkEvent::Disconnected) | None => break,
                },
            }
        }

        let registered = self
            .link_watchers
            .remove_if(&peer_id, |_, watcher| watcher.id == watcher_id);
        if registered.is_none() {
            debug!(peer_id = %peer_id, "Link watcher superseded, ignoring drop");
            return;
        }
        if let Some(state) = self.apply(&peer_id, &LinkInput::Dropped) {
            warn!(peer_id = %peer_id, "Connection dropped");
            self.publish_state(
                &peer_id,
                state,
                Some("The connection to this device was lost.".to_string()),
            );
        }
    }

    /// Apply an input to a peer's state; returns the new state when it changed
    fn apply(&self, peer_id: &PeerId, input: &LinkInput) -> Option<ConnectionState> {
        let mut state = self.states.get_mut(peer_id)?;
        let next = state.on(input)?;
        *state = next.clone();
        Some(next)
    }

    fn publish_state(&self, peer_id: &PeerId, state: ConnectionState, message: Option<String>) {
        self.events.publish(SentinelEvent::ConnectionStateChanged {
            peer_id: peer_id.clone(),
            state,
            message,
        });
    }
}
