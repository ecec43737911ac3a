use crate::logging::LogFormat;
use sentinel_core::config::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_EMERGENCY_GRACE_SECS, DEFAULT_EVENT_CAPACITY,
    DEFAULT_SCAN_DURATION_SECS,
};
use sentinel_core::{EngineConfig, PermissionStatus, DEFAULT_PEER_SIGNATURE};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub position: PositionConfig,
    pub log_format: LogFormat,
}

/// Where this host is, as far as the CLI is concerned
#[derive(Debug, Clone)]
pub struct PositionConfig {
    /// `None` when no coordinates are configured
    pub fix: Option<(f64, f64)>,
    pub permission: PermissionStatus,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            engine: EngineConfig {
                scan_duration: Duration::from_secs(
                    env::var("SENTINEL_SCAN_DURATION_SECS")
                        .unwrap_or_else(|_| DEFAULT_SCAN_DURATION_SECS.to_string())
                        .parse()?,
                ),
                emergency_grace_period: Duration::from_secs(
                    env::var("SENTINEL_EMERGENCY_GRACE_SECS")
                        .unwrap_or_else(|_| DEFAULT_EMERGENCY_GRACE_SECS.to_string())
                        .parse()?,
                ),
                connect_timeout: Duration::from_secs(
                    env::var("SENTINEL_CONNECT_TIMEOUT_SECS")
                        .unwrap_or_else(|_| DEFAULT_CONNECT_TIMEOUT_SECS.to_string())
                        .parse()?,
                ),
                event_capacity: env::var("SENTINEL_EVENT_CAPACITY")
                    .unwrap_or_else(|_| DEFAULT_EVENT_CAPACITY.to_string())
                    .parse()?,
                peer_signature: env::var("SENTINEL_PEER_SIGNATURE")
                    .unwrap_or_else(|_| DEFAULT_PEER_SIGNATURE.to_string()),
            },
            position: PositionConfig {
                fix: parse_fix(
                    env::var("SENTINEL_LATITUDE").ok(),
                    env::var("SENTINEL_LONGITUDE").ok(),
                )?,
                permission: env::var("SENTINEL_LOCATION_PERMISSION")
                    .unwrap_or_else(|_| "granted".to_string())
                    .parse()?,
            },
            log_format: env::var("SENTINEL_LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .parse()?,
        })
    }
}

/// Coordinates must be configured together and lie within range
fn parse_fix(latitude: Option<String>, longitude: Option<String>) -> anyhow::Result<Option<(f64, f64)>> {
    match (latitude, longitude) {
        (None, None) => Ok(None),
        (Some(latitude), Some(longitude)) => {
            let latitude: f64 = latitude.trim().parse()?;
            let longitude: f64 = longitude.trim().parse()?;
            anyhow::ensure!(
                (-90.0..=90.0).contains(&latitude),
                "SENTINEL_LATITUDE out of range: {}",
                latitude
            );
            anyhow::ensure!(
                (-180.0..=180.0).contains(&longitude),
                "SENTINEL_LONGITUDE out of range: {}",
                longitude
            );
            Ok(Some((latitude, longitude)))
        }
        _ => anyhow::bail!("SENTINEL_LATITUDE and SENTINEL_LONGITUDE must be set together"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fix() {
        assert_eq!(parse_fix(None, None).unwrap(), None);
        assert_eq!(
            parse_fix(Some("37.7749".into()), Some(" -122.4194".into())).unwrap(),
            Some((37.7749, -122.4194))
        );
    }

    #[test]
    fn test_parse_fix_rejects_partial_or_out_of_range() {
        assert!(parse_fix(Some("1.0".into()), None).is_err());
        assert!(parse_fix(Some("91".into()), Some("0".into())).is_err());
        assert!(parse_fix(Some("0".into()), Some("east".into())).is_err());
    }
}
