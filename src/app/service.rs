use super::types::{RecordingFile, ShutdownReason};
use crate::alert::AlertDispatcher;
use crate::alert::AlertEvent;
use crate::config::WildwatchConfig;
use crate::detection::FrameResult;
use crate::error::{Result, WildwatchError};
use crate::events::{EventBus, EventFilter, EventReceiver, WildwatchEvent};
use crate::frame::FrameData;
use crate::pipeline::PipelineContext;
use crate::recorder::{RecordingInfo, RecordingSummary};
use crate::registry::{CameraId, CameraRegistry, CameraState};
use crate::storage::{DetectionRecord, DetectionStats, EventStore};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const TEST_SMS_TEXT: &str = "Test SMS from Wildlife Alert System";
const TEST_EMAIL_SUBJECT: &str = "Test Alert";
const TEST_EMAIL_BODY: &str = "This is a test email from Wildlife Alert System";

/// Administrative surface over the camera registry, alert history and
/// live event stream
pub struct WildwatchService {
    pub(super) config: Arc<WildwatchConfig>,
    pub(super) registry: Arc<CameraRegistry>,
    pub(super) context: Arc<PipelineContext>,
    pub(super) store: Arc<dyn EventStore>,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) dispatcher: Arc<AlertDispatcher>,
    pub(super) image_counter: AtomicU64,

    // Lifecycle management
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl WildwatchService {
    pub fn config(&self) -> &WildwatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Token cancelled once shutdown begins; cancelling it asks `run` to stop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn add_camera(&self, id: CameraId) -> Result<CameraState> {
        Ok(self.registry.add(id).await?)
    }

    pub async fn start_camera(&self, id: CameraId) -> Result<CameraState> {
        self.registry.start(id).await
    }

    pub async fn stop_camera(&self, id: CameraId) -> Result<CameraState> {
        self.registry.stop(id).await
    }

    pub async fn remove_camera(&self, id: CameraId) -> Result<()> {
        self.registry.remove(id).await
    }

    pub async fn list_cameras(&self) -> Vec<CameraState> {
        self.registry.list().await
    }

    pub async fn camera_status(&self, id: CameraId) -> Result<CameraState> {
        Ok(self.registry.status(id).await?)
    }

    pub async fn start_recording(&self, id: CameraId) -> Result<RecordingInfo> {
        self.registry.start_recording(id).await
    }

    pub async fn stop_recording(&self, id: CameraId) -> Result<Option<RecordingSummary>> {
        self.registry.stop_recording(id).await
    }

    /// Files in the recordings directory, newest first
    pub async fn list_recordings(&self) -> Result<Vec<RecordingFile>> {
        list_recordings_in(Path::new(&self.config.recording.path)).await
    }

    /// Classify a still image without touching cameras, alerts or history
    pub async fn analyze_image(&self, bytes: &[u8]) -> Result<FrameResult> {
        let id = self.image_counter.fetch_add(1, Ordering::Relaxed);
        let frame = FrameData::from_image_bytes(id, bytes)?;

        let detections = self.context.classifier.detect(&frame).await?;
        let result = self.context.assess(
            None,
            frame.id,
            DateTime::<Utc>::from(frame.timestamp),
            detections,
        );

        info!(
            "Analyzed {}x{} image: {} detections, max tier {}",
            frame.width,
            frame.height,
            result.len(),
            result.max_tier()
        );
        Ok(result)
    }

    pub async fn recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        self.store.list_recent_alerts(limit).await
    }

    pub async fn recent_detections(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Vec<DetectionRecord> {
        self.store.recent_detections(camera_id, limit).await
    }

    /// Counts over the last `days` days, or all-time with `None`
    pub async fn statistics(&self, days: Option<u32>) -> DetectionStats {
        let since = days.and_then(|days| {
            chrono::Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(days)))
        });
        self.store.statistics(since).await
    }

    pub async fn clear_alerts(&self) -> Result<()> {
        self.store.clear_alerts().await
    }

    /// Send one SMS outside the alert pipeline; not throttled or recorded
    pub async fn send_test_sms(&self, number: &str, text: Option<&str>) -> bool {
        let text = text.unwrap_or(TEST_SMS_TEXT);
        debug!("Sending test SMS to {}", number);
        self.dispatcher.notifier().send_sms(number, text).await
    }

    /// Send one email outside the alert pipeline; not throttled or recorded
    pub async fn send_test_email(
        &self,
        address: &str,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> bool {
        debug!("Sending test email to {}", address);
        self.dispatcher
            .notifier()
            .send_email(
                address,
                subject.unwrap_or(TEST_EMAIL_SUBJECT),
                body.unwrap_or(TEST_EMAIL_BODY),
            )
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WildwatchEvent> {
        self.event_bus.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        self.event_bus.subscribe_filtered(filter, name)
    }
}

pub(super) async fn list_recordings_in(directory: &Path) -> Result<Vec<RecordingFile>> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(WildwatchError::component(
                "recordings",
                &format!("Failed to read {}: {}", directory.display(), e),
            ))
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }

        let created = metadata.created().or_else(|_| metadata.modified())?;
        files.push(RecordingFile {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path(),
            size_bytes: metadata.len(),
            created_at: DateTime::<Utc>::from(created),
        });
    }

    files.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
    Ok(files)
}
