use std::time::Duration;

use crate::types::DEFAULT_PEER_SIGNATURE;

/// Default scan window in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Delay between starting an emergency scan and sharing with discovered peers
pub const DEFAULT_EMERGENCY_GRACE_SECS: u64 = 3;

/// Upper bound on a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Buffered events per subscriber before slow subscribers start lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for the discovery and broadcast engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scan_duration: Duration,
    pub emergency_grace_period: Duration,
    pub connect_timeout: Duration,
    pub event_capacity: usize,
    /// Case-insensitive name fragment identifying Sentinel peers
    pub peer_signature: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(DEFAULT_SCAN_DURATION_SECS),
            emergency_grace_period: Duration::from_secs(DEFAULT_EMERGENCY_GRACE_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            peer_signature: DEFAULT_PEER_SIGNATURE.to_string(),
        }
    }
}
