// Positioning for hosts without a location sensor: a configured fixed position

use async_trait::async_trait;
use chrono::Utc;
use sentinel_core::{PermissionStatus, Position, PositioningService, Result, SentinelError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// How often the configured position is re-reported while tracking
const FIX_INTERVAL: Duration = Duration::from_secs(5);

pub struct StaticPositioning {
    fix: Option<(f64, f64)>,
    status: RwLock<PermissionStatus>,
}

impl StaticPositioning {
    pub fn new(fix: Option<(f64, f64)>, permission: PermissionStatus) -> Self {
        Self {
            fix,
            status: RwLock::new(permission),
        }
    }

    fn position(&self) -> Result<Position> {
        let (latitude, longitude) = self.fix.ok_or_else(|| {
            SentinelError::PositionUnavailable(
                "set SENTINEL_LATITUDE and SENTINEL_LONGITUDE".to_string(),
            )
        })?;
        Ok(Position::new(latitude, longitude, Utc::now()))
    }
}

#[async_trait]
impl PositioningService for StaticPositioning {
    async fn check_permission(&self) -> PermissionStatus {
        *self.status.read().await
    }

    /// There is nobody to prompt: a permission that was never requested is
    /// granted, any other status stands.
    async fn request_permission(&self) -> PermissionStatus {
        let mut status = self.status.write().await;
        if *status == PermissionStatus::NotRequested {
            *status = PermissionStatus::Granted;
        }
        *status
    }

    async fn current_fix(&self) -> Result<Position> {
        self.position()
    }

    async fn fix_stream(&self) -> Result<mpsc::Receiver<Position>> {
        let (latitude, longitude) = self.position().map(|p| (p.latitude, p.longitude))?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FIX_INTERVAL);
            loop {
                interval.tick().await;
                let fix = Position::new(latitude, longitude, Utc::now());
                if tx.send(fix).await.is_err() {
                    debug!("Fix stream closed");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_requested_is_granted_on_request() {
        let positioning = StaticPositioning::new(Some((1.0, 2.0)), PermissionStatus::NotRequested);
        assert_eq!(
            positioning.request_permission().await,
            PermissionStatus::Granted
        );
        assert_eq!(
            positioning.check_permission().await,
            PermissionStatus::Granted
        );
    }

    #[tokio::test]
    async fn test_denied_stays_denied() {
        let positioning = StaticPositioning::new(Some((1.0, 2.0)), PermissionStatus::Denied);
        assert_eq!(
            positioning.request_permission().await,
            PermissionStatus::Denied
        );
    }

    #[tokio::test]
    async fn test_missing_position() {
        let positioning = StaticPositioning::new(None, PermissionStatus::Granted);
        assert!(matches!(
            positioning.current_fix().await,
            Err(SentinelError::PositionUnavailable(_))
        ));
        assert!(positioning.fix_stream().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_stream_repeats_position() {
        let positioning = StaticPositioning::new(Some((48.0, 11.0)), PermissionStatus::Granted);
        let mut fixes = positioning.fix_stream().await.unwrap();

        let first = fixes.recv().await.unwrap();
        let second = fixes.recv().await.unwrap();
        assert_eq!((first.latitude, first.longitude), (48.0, 11.0));
        assert_eq!(second.latitude, 48.0);
    }
}
