pub mod types;
pub mod error;
pub mod config;
pub mod clock;
pub mod events;
pub mod radio;
pub mod permissions;
pub mod location;
pub mod discovery;
pub mod connection;
pub mod broadcast;
pub mod emergency;
pub mod engine;
pub mod ble;

pub use types::*;
pub use error::{SentinelError, Result, ErrorContext, ErrorCategory, FailureReason};
pub use config::EngineConfig;
pub use clock::{Clock, SystemClock, FixedClock};
pub use events::{EventBus, SentinelEvent};
pub use radio::RadioService;
pub use permissions::PermissionStatus;
pub use location::{LocationSource, LastKnownPosition, FixSubscription, PositioningService};
pub use discovery::{DiscoveryEngine, PeerSet, ScanStart};
pub use connection::{ConnectionManager, ConnectAttempt};
pub use broadcast::{BroadcastProtocol, WIRE_PREFIX};
pub use emergency::{EmergencyMode, EmergencyActions, EmergencyActivation, ShareReport, PeerFailure};
pub use engine::Sentinel;
pub use ble::BtleRadio;
