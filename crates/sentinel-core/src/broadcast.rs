// Location Broadcast Protocol - wire format and per-peer push sequencing

use crate::clock::Clock;
use crate::error::{ErrorContext, FailureReason, Result, SentinelError};
use crate::events::{EventBus, SentinelEvent};
use crate::location::LastKnownPosition;
use crate::radio::RadioService;
use crate::types::{DeliveryOutcome, DeliveryRecord, LocationPayload, PeerHandle, PeerId, Position};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Prefix identifying a location line on the wire
pub const WIRE_PREFIX: &str = "SENTINEL_LOCATION:";

/// Decimal places used for latitude and longitude
const COORDINATE_PRECISION: usize = 6;

impl LocationPayload {
    pub fn from_position(position: &Position, at: DateTime<Utc>) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            epoch_millis: at.timestamp_millis(),
        }
    }

    /// Encode as `SENTINEL_LOCATION:<lat>,<lon>,<epochMillis>`
    pub fn encode(&self) -> String {
        format!(
            "{}{:.prec$},{:.prec$},{}",
            WIRE_PREFIX,
            self.latitude,
            self.longitude,
            self.epoch_millis,
            prec = COORDINATE_PRECISION
        )
    }

    /// Decode a wire line. Unknown trailing fields and line terminators are
    /// ignored.
    pub fn decode(line: &str) -> Result<Self> {
        let body = line
            .trim_end_matches(['\r', '\n'])
            .strip_prefix(WIRE_PREFIX)
            .ok_or_else(|| SentinelError::InvalidPayload(format!("missing {} prefix", WIRE_PREFIX)))?;

        let mut fields = body.split(',');
        let latitude = parse_coordinate(next_field(&mut fields, "latitude")?, "latitude", 90.0)?;
        let longitude =
            parse_coordinate(next_field(&mut fields, "longitude")?, "longitude", 180.0)?;
        let epoch_millis = next_field(&mut fields, "timestamp")?
            .parse::<i64>()
            .map_err(|e| SentinelError::InvalidPayload(format!("timestamp: {}", e)))?;

        Ok(Self {
            latitude,
            longitude,
            epoch_millis,
        })
    }
}

impl std::fmt::Display for LocationPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn next_field<'a>(fields: &mut std::str::Split<'a, char>, name: &str) -> Result<&'a str> {
    fields
        .next()
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .ok_or_else(|| SentinelError::InvalidPayload(format!("missing {}", name)))
}

fn parse_coordinate(field: &str, name: &str, limit: f64) -> Result<f64> {
    let value = field
        .parse::<f64>()
        .map_err(|e| SentinelError::InvalidPayload(format!("{}: {}", name, e)))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(SentinelError::InvalidPayload(format!(
            "{} out of range: {}",
            name, value
        )));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct BroadcastProtocol {
    radio: Arc<dyn RadioService>,
    last_known: LastKnownPosition,
    clock: Arc<dyn Clock>,
    records: Arc<RwLock<HashMap<PeerId, DeliveryRecord>>>,
    events: EventBus,
}

impl BroadcastProtocol {
    pub fn new(
        radio: Arc<dyn RadioService>,
        last_known: LastKnownPosition,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            radio,
            last_known,
            clock,
            records: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Called when a peer reached `Connected`. Only Sentinel peers are pushed to.
    pub async fn on_peer_connected(&self, peer: &PeerHandle) -> Option<DeliveryRecord> {
        if !peer.is_sentinel_peer {
            debug!(peer_id = %peer.id, name = %peer.display_name, "Not a Sentinel peer, skipping push");
            return None;
        }
        Some(self.push(&peer.id).await)
    }

    /// Push the latest position to a connected peer, replacing any previous
    /// record for that peer.
    pub async fn push(&self, peer_id: &PeerId) -> DeliveryRecord {
        let Some(position) = self.last_known.get().await else {
            warn!(peer_id = %peer_id, "No position available to share");
            return self
                .record(peer_id, None, DeliveryOutcome::Failed(FailureReason::NoLocationYet))
                .await;
        };

        let payload = LocationPayload::from_position(&position, self.clock.now());
        self.record(peer_id, Some(payload), DeliveryOutcome::Pending)
            .await;

        let line = payload.encode();
        debug!(peer_id = %peer_id, line = %line, "Writing location payload");

        let outcome = match self.radio.write(peer_id, line.as_bytes()).await {
            Ok(()) => {
                info!(peer_id = %peer_id, "Location delivered");
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                e.log_with_context(
                    &ErrorContext::new()
                        .with_peer_id(peer_id.clone())
                        .with_operation("push")
                        .with_info(format!("{} byte payload", line.len())),
                );
                DeliveryOutcome::Failed(match e {
                    SentinelError::WriteFailure(details) => FailureReason::Write(details),
                    other => FailureReason::Write(other.to_string()),
                })
            }
        };

        self.record(peer_id, Some(payload), outcome).await
    }

    /// Store and publish a record, keeping the first attempt time of the peer
    async fn record(
        &self,
        peer_id: &PeerId,
        payload: Option<LocationPayload>,
        outcome: DeliveryOutcome,
    ) -> DeliveryRecord {
        let now = self.clock.now();
        let record = {
            let mut records = self.records.write().await;
            let first_attempt_at = records
                .get(peer_id)
                .map(|previous| previous.first_attempt_at)
                .unwrap_or(now);
            let record = DeliveryRecord {
                peer_id: peer_id.clone(),
                payload,
                outcome,
                delivered_at: now,
                first_attempt_at,
            };
            records.insert(peer_id.clone(), record.clone());
            record
        };

        let message = match &record.outcome {
            DeliveryOutcome::Failed(reason) => Some(reason.user_message()),
            _ => None,
        };
        self.events.publish(SentinelEvent::DeliveryChanged {
            peer_id: peer_id.clone(),
            outcome: record.outcome.clone(),
            message,
        });
        record
    }

    pub async fn record_for(&self, peer_id: &str) -> Option<DeliveryRecord> {
        self.records.read().await.get(peer_id).cloned()
    }

    /// All records ordered by first attempt, then peer id
    pub async fn records(&self) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> =
            self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.first_attempt_at
                .cmp(&b.first_attempt_at)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        records
    }

    /// Drop every record. Returns how many were cleared.
    pub async fn clear(&self) -> usize {
        let mut records = self.records.write().await;
        let cleared = records.len();
        records.clear();
        drop(records);
        if cleared > 0 {
            debug!(cleared, "Cleared delivery records");
            self.events
                .publish(SentinelEvent::DeliveriesCleared { cleared });
        }
        cleared
    }
}
