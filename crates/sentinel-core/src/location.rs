// Location Source - wraps the positioning capability and keeps the last known fix

use crate::error::{Result, SentinelError};
use crate::events::{EventBus, SentinelEvent};
use crate::permissions::PermissionStatus;
use crate::types::Position;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Positioning capability provided by the host platform
#[async_trait]
pub trait PositioningService: Send + Sync {
    /// Current permission status, without prompting
    async fn check_permission(&self) -> PermissionStatus;

    /// Prompt for permission once and report the resulting status
    async fn request_permission(&self) -> PermissionStatus;

    /// Best-effort single fix
    async fn current_fix(&self) -> Result<Position>;

    /// Stream of fixes as reported by the sensor. A fresh call starts a fresh stream.
    async fn fix_stream(&self) -> Result<mpsc::Receiver<Position>>;
}

/// Shared handle to the most recent fix
#[derive(Clone, Default)]
pub struct LastKnownPosition {
    inner: Arc<RwLock<Option<Position>>>,
}

impl LastKnownPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Position> {
        *self.inner.read().await
    }

    pub async fn set(&self, position: Position) {
        *self.inner.write().await = Some(position);
    }
}

pub struct LocationSource {
    service: Arc<dyn PositioningService>,
    last_known: LastKnownPosition,
    events: EventBus,
}

impl LocationSource {
    pub fn new(service: Arc<dyn PositioningService>, events: EventBus) -> Self {
        Self {
            service,
            last_known: LastKnownPosition::new(),
            events,
        }
    }

    /// Handle to the last known position, shared with the broadcast protocol
    pub fn last_known(&self) -> LastKnownPosition {
        self.last_known.clone()
    }

    pub async fn last_known_position(&self) -> Option<Position> {
        self.last_known.get().await
    }

    /// Query a single fix. Fails with `PermissionDenied` when permission has
    /// not been granted; the caller decides whether to request it.
    pub async fn get_current_fix(&self) -> Result<Position> {
        self.service.check_permission().await.verify()?;

        let fix = self.service.current_fix().await?;
        record_fix(&self.last_known, &self.events, fix).await;
        Ok(fix)
    }

    /// Ask the platform for permission. Never prompts after `DeniedForever`.
    pub async fn request_permission(&self) -> Result<PermissionStatus> {
        let current = self.service.check_permission().await;
        if current == PermissionStatus::Granted {
            return Ok(current);
        }
        if !current.can_request() {
            warn!("Location permission permanently denied, not prompting");
            return Err(SentinelError::PermissionDeniedForever);
        }

        info!(previous = %current, "Requesting location permission");
        let status = self.service.request_permission().await;
        info!(status = %status, "Location permission status");
        Ok(status)
    }

    /// Refresh the current fix, requesting permission at most once if it was
    /// denied.
    pub async fn refresh_location(&self) -> Result<Position> {
        match self.get_current_fix().await {
            Err(SentinelError::PermissionDenied) => {
                debug!("Location permission missing, requesting once");
                self.request_permission().await?.verify()?;
                self.get_current_fix().await
            }
            other => other,
        }
    }

    /// Open a fresh fix subscription
    pub async fn subscribe_to_fixes(&self) -> Result<FixSubscription> {
        self.service.check_permission().await.verify()?;

        let receiver = self.service.fix_stream().await?;
        debug!("Opened position subscription");
        Ok(FixSubscription {
            receiver,
            last_known: self.last_known.clone(),
            events: self.events.clone(),
        })
    }

    /// Keep the last known position current until `cancel` fires or the
    /// sensor stream ends. `cancel` is cancelled when the task exits either way.
    pub async fn start_tracking(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let mut subscription = self.subscribe_to_fixes().await?;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Position tracking cancelled");
                        break;
                    }
                    fix = subscription.next() => {
                        if fix.is_none() {
                            info!("Position stream ended");
                            break;
                        }
                    }
                }
            }
            cancel.cancel();
        }))
    }
}

/// A live sequence of fixes. Each delivered fix also updates the last known
/// position. Dropping the subscription releases the sensor stream.
pub struct FixSubscription {
    receiver: mpsc::Receiver<Position>,
    last_known: LastKnownPosition,
    events: EventBus,
}

impl FixSubscription {
    pub async fn next(&mut self) -> Option<Position> {
        let fix = self.receiver.recv().await?;
        record_fix(&self.last_known, &self.events, fix).await;
        Some(fix)
    }
}

async fn record_fix(last_known: &LastKnownPosition, events: &EventBus, fix: Position) {
    debug!(
        latitude = fix.latitude,
        longitude = fix.longitude,
        "New position fix"
    );
    last_known.set(fix).await;
    events.publish(SentinelEvent::PositionChanged { position: fix });
}
