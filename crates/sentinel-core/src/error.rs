use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentinelError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location permission permanently denied")]
    PermissionDeniedForever,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error("Connection rejected by peer: {0}")]
    ConnectionRejected(String),

    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("Radio error: {0}")]
    Radio(String),

    #[error("No location available yet")]
    NoLocationYet,

    #[error("Write failed: {0}")]
    WriteFailure(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Invalid location payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, SentinelError>;

/// Reason attached to a per-peer failure (connection state or delivery record)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    Timeout,
    Rejected,
    RadioUnavailable,
    Radio(String),
    NoLocationYet,
    Write(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Rejected => write!(f, "rejected"),
            FailureReason::RadioUnavailable => write!(f, "radio unavailable"),
            FailureReason::Radio(details) => write!(f, "radio error: {}", details),
            FailureReason::NoLocationYet => write!(f, "no location yet"),
            FailureReason::Write(details) => write!(f, "write failed: {}", details),
        }
    }
}

impl FailureReason {
    /// Short human-readable outcome for the UI
    pub fn user_message(&self) -> String {
        match self {
            FailureReason::Timeout => {
                "The device did not respond in time. It may be out of range.".to_string()
            }
            FailureReason::Rejected => "The device refused the connection.".to_string(),
            FailureReason::RadioUnavailable => {
                "Bluetooth is unavailable. Please turn it on and try again.".to_string()
            }
            FailureReason::Radio(details) => format!("Bluetooth error: {}.", details),
            FailureReason::NoLocationYet => {
                "Your location is not known yet. Wait for a GPS fix and try again.".to_string()
            }
            FailureReason::Write(details) => {
                format!("Could not send your location: {}.", details)
            }
        }
    }
}

impl From<&SentinelError> for FailureReason {
    fn from(err: &SentinelError) -> Self {
        match err {
            SentinelError::ConnectionTimeout(_) => FailureReason::Timeout,
            SentinelError::ConnectionRejected(_) => FailureReason::Rejected,
            SentinelError::RadioUnavailable(_) => FailureReason::RadioUnavailable,
            SentinelError::NoLocationYet => FailureReason::NoLocationYet,
            SentinelError::WriteFailure(details) => FailureReason::Write(details.clone()),
            other => FailureReason::Radio(other.to_string()),
        }
    }
}

/// Context for error logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub peer_id: Option<String>,
    pub session_id: Option<Uuid>,
    pub operation: Option<&'static str>,
    pub additional_info: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }
}

impl SentinelError {
    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            category = %self.category(),
            peer_id = ?context.peer_id,
            session_id = ?context.session_id,
            operation = ?context.operation,
            additional_info = ?context.additional_info,
            "Sentinel operation failed"
        );
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SentinelError::PermissionDenied => {
                "Location permission is required to share your position. Please allow it and try again.".to_string()
            }
            SentinelError::PermissionDeniedForever => {
                "Location permission was permanently denied. Enable it in your device settings.".to_string()
            }
            SentinelError::PositionUnavailable(details) => {
                format!("Your position is unavailable: {}. Move to open sky and try again.", details)
            }
            SentinelError::PeerNotFound(peer) => {
                format!("The device '{}' could not be found. It may have moved out of range.", peer)
            }
            SentinelError::InvalidPayload(details) => {
                format!("Received an unreadable location message: {}.", details)
            }
            SentinelError::InvalidInput(details) => {
                format!("Invalid input: {}. Please check the value and try again.", details)
            }
            other => FailureReason::from(other).user_message(),
        }
    }

    /// Get error category for log aggregation
    pub fn category(&self) -> ErrorCategory {
        match self {
            SentinelError::PermissionDenied => ErrorCategory::Permission,
            SentinelError::PermissionDeniedForever => ErrorCategory::Permission,
            SentinelError::PositionUnavailable(_) => ErrorCategory::Location,
            SentinelError::NoLocationYet => ErrorCategory::Location,
            SentinelError::RadioUnavailable(_) => ErrorCategory::Radio,
            SentinelError::Radio(_) => ErrorCategory::Radio,
            SentinelError::ConnectionTimeout(_) => ErrorCategory::Connection,
            SentinelError::ConnectionRejected(_) => ErrorCategory::Connection,
            SentinelError::PeerNotFound(_) => ErrorCategory::Connection,
            SentinelError::WriteFailure(_) => ErrorCategory::Delivery,
            SentinelError::InvalidPayload(_) => ErrorCategory::Protocol,
            SentinelError::InvalidInput(_) => ErrorCategory::Validation,
        }
    }

    /// Terminal errors end the attempted operation and must be shown to the user
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Permission | ErrorCategory::Radio
        ) && !matches!(self, SentinelError::Radio(_))
    }
}

/// Error categories for log aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Permission,
    Location,
    Radio,
    Connection,
    Delivery,
    Protocol,
    Validation,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Location => write!(f, "location"),
            ErrorCategory::Radio => write!(f, "radio"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Delivery => write!(f, "delivery"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Validation => write!(f, "validation"),
        }
    }
}
