mod common;

use common::{drain, observed, sentinel, settle, MockPositioning, MockRadio};
use sentinel_core::{
    ConnectionState, EmergencyActivation, PermissionStatus, SentinelError, SentinelEvent,
};
use std::time::Duration;

fn mixed_neighbourhood() -> Vec<sentinel_core::ObservedPeer> {
    vec![
        observed("AA:01", Some("Sentinel Alice")),
        observed("AA:02", Some("Car Stereo")),
        observed("AA:03", Some("sentinel-bob")),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_emergency_shares_with_sentinel_peers_only() {
    let radio = MockRadio::new();
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(48.8566, 2.3522));
    engine.refresh_location().await.unwrap();
    let mut events = engine.subscribe();

    let activation = engine.activate_emergency_mode().await.unwrap();
    assert!(engine.is_emergency_active().await);
    assert!(engine.is_scanning().await);

    radio.emit(mixed_neighbourhood()).await;
    settle().await;
    assert!(radio.connects().is_empty());

    let report = activation.share_report().await.unwrap();
    assert_eq!(report.attempted, vec!["AA:01".to_string(), "AA:03".to_string()]);
    assert_eq!(report.delivered, vec!["AA:01".to_string(), "AA:03".to_string()]);
    assert!(report.failed.is_empty());

    let mut connected = radio.connects();
    connected.sort();
    assert_eq!(connected, vec!["AA:01".to_string(), "AA:03".to_string()]);
    assert_eq!(
        engine.connection_state("AA:02"),
        ConnectionState::Disconnected
    );
    assert_eq!(radio.writes().len(), 2);

    let published = drain(&mut events);
    assert!(published.contains(&SentinelEvent::EmergencyModeChanged { active: true }));
    // Emergency mode stays on after sharing
    assert!(engine.is_emergency_active().await);
}

#[tokio::test(start_paused = true)]
async fn test_share_waits_for_grace_period() {
    let radio = MockRadio::new();
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(1.0, 1.0));
    engine.refresh_location().await.unwrap();

    let _activation = engine.activate_emergency_mode().await.unwrap();
    radio.emit(mixed_neighbourhood()).await;

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert!(radio.connects().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(radio.connects().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_peers_to_share() {
    let radio = MockRadio::new();
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(1.0, 1.0));
    let mut events = engine.subscribe();

    let activation = engine.activate_emergency_mode().await.unwrap();
    radio
        .emit(vec![observed("AA:02", Some("Car Stereo"))])
        .await;

    let report = activation.share_report().await.unwrap();
    assert!(report.is_empty());
    assert!(radio.connects().is_empty());
    assert!(drain(&mut events).contains(&SentinelEvent::NoPeersToShare));
}

#[tokio::test(start_paused = true)]
async fn test_one_failure_does_not_block_others() {
    let radio = MockRadio::new();
    radio.fail_connect("AA:01", SentinelError::ConnectionRejected("busy".to_string()));
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(1.0, 1.0));
    engine.refresh_location().await.unwrap();

    let activation = engine.activate_emergency_mode().await.unwrap();
    radio.emit(mixed_neighbourhood()).await;

    let report = activation.share_report().await.unwrap();
    assert_eq!(report.delivered, vec!["AA:03".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].peer_id, "AA:01");
    assert!(!report.failed[0].message.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connected_peer_is_skipped() {
    let radio = MockRadio::new();
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(1.0, 1.0));
    engine.refresh_location().await.unwrap();

    engine.start_scan().await.unwrap();
    radio.emit(mixed_neighbourhood()).await;
    settle().await;
    engine.connect(&"AA:01".to_string()).await.unwrap();

    // The running session is reused, so the existing link survives
    let activation = engine.activate_emergency_mode().await.unwrap();
    let report = activation.share_report().await.unwrap();

    assert_eq!(report.skipped, vec!["AA:01".to_string()]);
    assert_eq!(report.delivered, vec!["AA:03".to_string()]);
    assert_eq!(
        radio
            .connects()
            .iter()
            .filter(|peer| peer.as_str() == "AA:01")
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_activation_while_pending() {
    let radio = MockRadio::new();
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(1.0, 1.0));

    let first = engine.activate_emergency_mode().await.unwrap();
    let second = engine.activate_emergency_mode().await.unwrap();

    assert!(matches!(second, EmergencyActivation::AlreadyPending));
    assert_eq!(radio.scan_starts(), 1);
    first.share_report().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_cancels_share_and_clears_records() {
    let radio = MockRadio::new();
    let engine = sentinel(radio.clone(), MockPositioning::granted_at(1.0, 1.0));
    engine.refresh_location().await.unwrap();

    let first = engine.activate_emergency_mode().await.unwrap();
    radio.emit(mixed_neighbourhood()).await;
    first.share_report().await.unwrap();
    assert_eq!(engine.delivery_records().await.len(), 2);
    let mut events = engine.subscribe();

    assert!(engine.deactivate_emergency_mode().await);
    assert!(!engine.is_emergency_active().await);
    assert!(engine.delivery_records().await.is_empty());
    assert!(drain(&mut events).contains(&SentinelEvent::DeliveriesCleared { cleared: 2 }));

    // A deactivation before the grace period elapses cancels the share
    let second = engine.activate_emergency_mode().await.unwrap();
    assert!(engine.deactivate_emergency_mode().await);
    assert!(second.share_report().await.is_none());
    assert_eq!(radio.connects().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_activation_fails_without_radio() {
    let radio = MockRadio::new();
    radio.fail_scan(SentinelError::RadioUnavailable("bluetooth off".to_string()));
    let engine = sentinel(radio.clone(), MockPositioning::new(PermissionStatus::Granted));

    let err = engine.activate_emergency_mode().await.unwrap_err();
    assert!(matches!(err, SentinelError::RadioUnavailable(_)));
    assert!(!engine.is_emergency_active().await);
}
