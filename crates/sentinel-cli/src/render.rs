// Renders core events and share reports for the terminal

use sentinel_core::{DeliveryOutcome, SentinelEvent, ShareReport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Print every event until the bus closes
pub fn spawn_event_printer(
    mut events: broadcast::Receiver<SentinelEvent>,
    json: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = render_event(&event, json) {
                        println!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// One line per event; `None` for events not worth a line of their own
pub fn render_event(event: &SentinelEvent, json: bool) -> Option<String> {
    if json {
        return match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(e) => {
                warn!(error = %e, "Failed to serialize event");
                None
            }
        };
    }

    let line = match event {
        SentinelEvent::PeersChanged { peers } => {
            let newest = peers.last()?;
            let tag = if newest.is_sentinel_peer { " [sentinel]" } else { "" };
            format!("found   {}  {}{}", newest.id, newest.display_name, tag)
        }
        SentinelEvent::ScanStateChanged { scanning: true, .. } => "scanning...".to_string(),
        SentinelEvent::ScanStateChanged { scanning: false, .. } => "scan finished".to_string(),
        SentinelEvent::ConnectionStateChanged {
            peer_id,
            state,
            message,
        } => match message {
            Some(message) => format!("link    {}  {}: {}", peer_id, state, message),
            None => format!("link    {}  {}", peer_id, state),
        },
        SentinelEvent::DeliveryChanged {
            outcome: DeliveryOutcome::Pending,
            ..
        } => return None,
        SentinelEvent::DeliveryChanged {
            peer_id,
            outcome,
            message,
        } => match message {
            Some(message) => format!("share   {}  {}: {}", peer_id, outcome, message),
            None => format!("share   {}  {}", peer_id, outcome),
        },
        SentinelEvent::PositionChanged { position } => format!(
            "fix     {:.6}, {:.6}",
            position.latitude, position.longitude
        ),
        SentinelEvent::DeliveriesCleared { cleared } => {
            format!("share records cleared ({})", cleared)
        }
        SentinelEvent::NoPeersToShare => "no Sentinel devices nearby to share with".to_string(),
        SentinelEvent::EmergencyModeChanged { active: true } => "EMERGENCY MODE ON".to_string(),
        SentinelEvent::EmergencyModeChanged { active: false } => "emergency mode off".to_string(),
    };
    Some(line)
}

pub fn print_report(report: &ShareReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!(
        "shared with {} of {} Sentinel device(s)",
        report.delivered.len(),
        report.attempted.len()
    );
    for failure in &report.failed {
        println!("  failed   {}: {}", failure.peer_id, failure.message);
    }
    for peer_id in &report.skipped {
        println!("  skipped  {} (already connected)", peer_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{FailureReason, PeerHandle};

    #[test]
    fn test_render_new_peer() {
        let event = SentinelEvent::PeersChanged {
            peers: vec![PeerHandle::new(
                "AA:01".to_string(),
                "Sentinel Alice".to_string(),
                "sentinel",
            )],
        };
        let line = render_event(&event, false).unwrap();
        assert!(line.contains("AA:01"));
        assert!(line.contains("[sentinel]"));
    }

    #[test]
    fn test_pending_delivery_not_rendered() {
        let event = SentinelEvent::DeliveryChanged {
            peer_id: "AA:01".to_string(),
            outcome: DeliveryOutcome::Pending,
            message: None,
        };
        assert!(render_event(&event, false).is_none());
        assert!(render_event(&event, true).is_some());
    }

    #[test]
    fn test_render_json() {
        let event = SentinelEvent::DeliveryChanged {
            peer_id: "AA:01".to_string(),
            outcome: DeliveryOutcome::Failed(FailureReason::NoLocationYet),
            message: Some(FailureReason::NoLocationYet.user_message()),
        };
        let value: serde_json::Value =
            serde_json::from_str(&render_event(&event, true).unwrap()).unwrap();
        assert_eq!(value["type"], "DeliveryChanged");
        assert_eq!(value["peer_id"], "AA:01");
    }

    #[test]
    fn test_empty_peer_list_not_rendered() {
        let event = SentinelEvent::PeersChanged { peers: Vec::new() };
        assert!(render_event(&event, false).is_none());
    }
}
