// Location permission handling

use serde::{Deserialize, Serialize};

use crate::error::{Result, SentinelError};

/// Permission status for the positioning capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    /// Permission has not been requested yet
    NotRequested,
    /// Permission has been granted
    Granted,
    /// Permission has been denied; asking again may succeed
    Denied,
    /// Permission has been denied and the platform will not prompt again
    DeniedForever,
}

impl PermissionStatus {
    /// Map a status to the outcome of an operation that needs the permission
    pub fn verify(self) -> Result<()> {
        match self {
            PermissionStatus::Granted => Ok(()),
            PermissionStatus::NotRequested | PermissionStatus::Denied => {
                Err(SentinelError::PermissionDenied)
            }
            PermissionStatus::DeniedForever => Err(SentinelError::PermissionDeniedForever),
        }
    }

    /// Whether a fresh permission request could change the status
    pub fn can_request(self) -> bool {
        matches!(self, PermissionStatus::NotRequested | PermissionStatus::Denied)
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::NotRequested => write!(f, "not requested"),
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::DeniedForever => write!(f, "denied forever"),
        }
    }
}

impl std::str::FromStr for PermissionStatus {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "not_requested" => Ok(PermissionStatus::NotRequested),
            "granted" => Ok(PermissionStatus::Granted),
            "denied" => Ok(PermissionStatus::Denied),
            "denied_forever" => Ok(PermissionStatus::DeniedForever),
            other => Err(SentinelError::InvalidInput(format!(
                "unknown permission status '{}'",
                other
            ))),
        }
    }
}
