// Emergency Orchestrator - scan, wait for the grace period, share with every Sentinel peer

use crate::discovery::ScanStart;
use crate::error::Result;
use crate::events::{EventBus, SentinelEvent};
use crate::types::{DeliveryOutcome, DeliveryRecord, PeerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Operations the emergency sequence drives
#[async_trait]
pub trait EmergencyActions: Send + Sync {
    async fn start_scan(&self, duration: Duration) -> Result<ScanStart>;

    async fn share_with_all_sentinel_peers(&self) -> ShareReport;

    async fn clear_deliveries(&self);
}

/// A peer that could not be reached, with a user-facing explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerFailure {
    pub peer_id: PeerId,
    pub message: String,
}

/// Outcome of sharing with every discovered Sentinel peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShareReport {
    /// Sentinel peers a connect was issued for
    pub attempted: Vec<PeerId>,
    pub delivered: Vec<PeerId>,
    pub failed: Vec<PeerFailure>,
    /// Peers already connecting or connected, left untouched
    pub skipped: Vec<PeerId>,
}

impl ShareReport {
    /// True when there was nobody to share with
    pub fn is_empty(&self) -> bool {
        self.attempted.is_empty()
    }

    /// Fold one peer's connect-and-push result into the report
    pub fn record(&mut self, peer_id: PeerId, result: Result<Option<DeliveryRecord>>) {
        self.attempted.push(peer_id.clone());
        match result {
            Ok(Some(record)) => match record.outcome {
                DeliveryOutcome::Delivered => self.delivered.push(peer_id),
                DeliveryOutcome::Failed(reason) => self.failed.push(PeerFailure {
                    peer_id,
                    message: reason.user_message(),
                }),
                DeliveryOutcome::Pending => self.skipped.push(peer_id),
            },
            Ok(None) => self.skipped.push(peer_id),
            Err(e) => self.failed.push(PeerFailure {
                peer_id,
                message: e.user_message(),
            }),
        }
    }

    /// Sort every list by peer id so reports compare deterministically
    pub fn sorted(mut self) -> Self {
        self.attempted.sort();
        self.delivered.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        self
    }
}

/// Result of an activation request
#[derive(Debug)]
pub enum EmergencyActivation {
    Activated {
        scan: ScanStart,
        share: JoinHandle<Option<ShareReport>>,
    },
    /// A grace-period share is already pending; nothing changed
    AlreadyPending,
}

impl EmergencyActivation {
    /// Wait for the grace-period share. `None` when it was cancelled or the
    /// activation was a no-op.
    pub async fn share_report(self) -> Option<ShareReport> {
        match self {
            EmergencyActivation::Activated { share, .. } => match share.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "Emergency share task failed");
                    None
                }
            },
            EmergencyActivation::AlreadyPending => None,
        }
    }
}

enum EmergencyState {
    Inactive,
    Active {
        activated_at: DateTime<Utc>,
        pending_share: CancellationToken,
    },
}

#[derive(Clone)]
pub struct EmergencyMode {
    scan_duration: Duration,
    grace_period: Duration,
    state: Arc<Mutex<EmergencyState>>,
    events: EventBus,
}

impl EmergencyMode {
    pub fn new(scan_duration: Duration, grace_period: Duration, events: EventBus) -> Self {
        Self {
            scan_duration,
            grace_period,
            state: Arc::new(Mutex::new(EmergencyState::Inactive)),
            events,
        }
    }

    /// Start a scan and, after the grace period, share with every Sentinel
    /// peer discovered so far. Radio errors from the scan end the activation.
    pub async fn activate<A>(&self, actions: A) -> Result<EmergencyActivation>
    where
        A: EmergencyActions + 'static,
    {
        let mut state = self.state.lock().await;
        let was_active = match &*state {
            EmergencyState::Active { pending_share, .. } if !pending_share.is_cancelled() => {
                debug!("Emergency share already pending");
                return Ok(EmergencyActivation::AlreadyPending);
            }
            EmergencyState::Active { .. } => true,
            EmergencyState::Inactive => false,
        };

        let scan = actions.start_scan(self.scan_duration).await?;

        let pending_share = CancellationToken::new();
        *state = EmergencyState::Active {
            activated_at: Utc::now(),
            pending_share: pending_share.clone(),
        };
        drop(state);

        info!(
            grace_secs = self.grace_period.as_secs_f64(),
            session_id = %scan.session().session_id,
            "Emergency mode activated"
        );
        if !was_active {
            self.events
                .publish(SentinelEvent::EmergencyModeChanged { active: true });
        }

        let grace_period = self.grace_period;
        let share = tokio::spawn(async move {
            let report = tokio::select! {
                _ = pending_share.cancelled() => {
                    debug!("Emergency share cancelled before grace period elapsed");
                    None
                }
                _ = tokio::time::sleep(grace_period) => {
                    Some(actions.share_with_all_sentinel_peers().await)
                }
            };
            pending_share.cancel();
            if let Some(report) = &report {
                info!(
                    attempted = report.attempted.len(),
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "Emergency share finished"
                );
            }
            report
        });

        Ok(EmergencyActivation::Activated { scan, share })
    }

    /// Leave emergency mode: cancel a pending share and clear delivery
    /// records. Returns `false` when the mode was not active.
    pub async fn deactivate<A>(&self, actions: &A) -> bool
    where
        A: EmergencyActions,
    {
        let mut state = self.state.lock().await;
        let EmergencyState::Active {
            activated_at,
            pending_share,
        } = std::mem::replace(&mut *state, EmergencyState::Inactive)
        else {
            return false;
        };
        drop(state);

        pending_share.cancel();
        actions.clear_deliveries().await;

        let active_secs = (Utc::now() - activated_at).num_seconds();
        info!(active_secs, "Emergency mode deactivated");
        self.events
            .publish(SentinelEvent::EmergencyModeChanged { active: false });
        true
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, EmergencyState::Active { .. })
    }
}
