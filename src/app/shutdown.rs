use super::{ShutdownReason, WildwatchService};
use crate::alert::AlertRequest;
use crate::error::Result;
use crate::events::WildwatchEvent;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::timeout;
use tracing::{error, info, warn};

impl WildwatchService {
    /// Stop every camera (closing recordings), then report the stop.
    ///
    /// Returns the process exit code: 1 when cameras did not stop in time.
    pub async fn shutdown(&self, reason: ShutdownReason) -> Result<i32> {
        info!("Beginning graceful shutdown ({})", reason.describe());

        self.cancellation_token.cancel();

        let _ = self
            .event_bus
            .publish(WildwatchEvent::ShutdownRequested {
                timestamp: SystemTime::now(),
                reason: reason.describe(),
            })
            .await;

        let camera_count = self.registry.len().await as u64;
        let per_camera = Duration::from_secs(self.config.system.stop_timeout_seconds.max(1));
        let budget = per_camera * (camera_count.max(1) as u32) + per_camera;

        let mut exit_code = 0;
        match timeout(budget, self.registry.shutdown()).await {
            Ok(()) => info!("All cameras stopped"),
            Err(_) => {
                error!("Cameras did not stop within {:?}", budget);
                exit_code = 1;
            }
        }

        if let ShutdownReason::Error(e) = &reason {
            warn!("Shutting down after error: {}", e);
            exit_code = 1;
        }

        self.dispatcher
            .fire(AlertRequest::system(None, "system stopped"), Instant::now())
            .await;

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
