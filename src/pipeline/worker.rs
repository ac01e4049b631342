use super::burst::BurstWindow;
use crate::alert::{AlertDispatcher, AlertRequest};
use crate::camera::{CameraSpec, FrameSource};
use crate::config::{AlertConfig, WildwatchConfig};
use crate::detection::{AssessedDetection, Classifier, DangerTier, FrameResult, RiskEvaluator};
use crate::error::{RecorderError, RegistryError, Result, WildwatchError};
use crate::events::{EventBus, WildwatchEvent};
use crate::frame::FrameData;
use crate::recorder::{
    CodecCandidate, Recorder, RecordingInfo, RecordingSummary, VideoWriterFactory,
};
use crate::registry::{CameraId, CameraPhase};
use crate::storage::EventStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const COMMAND_QUEUE_DEPTH: usize = 8;

/// Shared collaborators and tuning for every camera worker
pub struct PipelineContext {
    pub classifier: Arc<dyn Classifier>,
    pub evaluator: Arc<RiskEvaluator>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub store: Arc<dyn EventStore>,
    pub event_bus: Arc<EventBus>,
    pub writer_factory: Arc<dyn VideoWriterFactory>,
    pub alerts: AlertConfig,
    pub recording_dir: PathBuf,
    pub codecs: Vec<CodecCandidate>,
    pub auto_record_tier: Option<DangerTier>,
    pub postroll: Duration,
    pub frame_timeout: Duration,
    pub stale_after: Duration,
}

impl PipelineContext {
    /// Tuning comes from `config`; the collaborators are passed in so tests
    /// can substitute doubles.
    pub fn new(
        config: &WildwatchConfig,
        classifier: Arc<dyn Classifier>,
        dispatcher: Arc<AlertDispatcher>,
        store: Arc<dyn EventStore>,
        event_bus: Arc<EventBus>,
        writer_factory: Arc<dyn VideoWriterFactory>,
    ) -> Result<Self> {
        let codecs = config
            .recording
            .codecs
            .iter()
            .map(|name| {
                CodecCandidate::from_name(name).ok_or_else(|| {
                    WildwatchError::component("pipeline", &format!("Unknown codec: {}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let auto_record_tier = match &config.recording.auto_record_tier {
            Some(name) => Some(DangerTier::from_name(name).ok_or_else(|| {
                WildwatchError::component("pipeline", &format!("Unknown danger tier: {}", name))
            })?),
            None => None,
        };

        Ok(Self {
            classifier,
            evaluator: Arc::new(RiskEvaluator::new(&config.risk)),
            dispatcher,
            store,
            event_bus,
            writer_factory,
            alerts: config.alerts.clone(),
            recording_dir: PathBuf::from(&config.recording.path),
            codecs,
            auto_record_tier,
            postroll: Duration::from_secs(config.recording.postroll_seconds),
            frame_timeout: Duration::from_millis(config.camera.frame_timeout_ms),
            stale_after: Duration::from_secs(config.camera.stale_after_seconds),
        })
    }

    /// Classify one frame and assess every detection. A classifier failure
    /// yields an empty result.
    pub async fn analyze(&self, camera_id: Option<CameraId>, frame: &FrameData) -> FrameResult {
        let captured_at = DateTime::<Utc>::from(frame.timestamp);

        let detections = match self.classifier.detect(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(
                    "Classifier {} failed on frame {}: {}",
                    self.classifier.name(),
                    frame.id,
                    e
                );
                Vec::new()
            }
        };

        self.assess(camera_id, frame.id, captured_at, detections)
    }

    /// Attach a risk assessment to each detection, keeping classifier order
    pub fn assess(
        &self,
        camera_id: Option<CameraId>,
        frame_id: u64,
        captured_at: DateTime<Utc>,
        detections: Vec<crate::detection::Detection>,
    ) -> FrameResult {
        let detections = detections
            .into_iter()
            .map(|detection| AssessedDetection {
                assessment: self.evaluator.evaluate(&detection),
                detection,
            })
            .collect();

        FrameResult {
            camera_id,
            frame_id,
            captured_at,
            detections,
        }
    }
}

/// Snapshot of a camera published over its status channel
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub phase: CameraPhase,
    pub live: bool,
    pub recording: Option<RecordingInfo>,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_max_tier: DangerTier,
}

/// Requests handled by a running worker between frames
pub enum WorkerCommand {
    Stop {
        reply: oneshot::Sender<()>,
    },
    StartRecording {
        reply: oneshot::Sender<std::result::Result<RecordingInfo, RecorderError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Option<RecordingSummary>>,
    },
}

/// Owner's side of a running worker
pub struct WorkerHandle {
    camera_id: CameraId,
    commands: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn start_recording(&self) -> Result<RecordingInfo> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerCommand::StartRecording { reply }).await?;
        let info = response.await.map_err(|_| self.unavailable("no reply"))??;
        Ok(info)
    }

    pub async fn stop_recording(&self) -> Result<Option<RecordingSummary>> {
        let (reply, response) = oneshot::channel();
        self.send(WorkerCommand::StopRecording { reply }).await?;
        response
            .await
            .map_err(|_| WildwatchError::from(self.unavailable("no reply")))
    }

    /// Ask the worker to finish and wait for it, aborting it after `timeout`
    pub async fn stop(self, timeout: Duration) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(WorkerCommand::Stop { reply }).await.is_err() {
            debug!("Camera {} worker already exited", self.camera_id);
        } else if tokio::time::timeout(timeout, response).await.is_err() {
            warn!(
                "Camera {} worker did not stop within {:?}; aborting",
                self.camera_id, timeout
            );
            self.task.abort();
            return;
        }

        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("Camera {} worker task failed: {}", self.camera_id, e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WildwatchError::from(self.unavailable("command channel closed")))
    }

    fn unavailable(&self, details: &str) -> RegistryError {
        RegistryError::WorkerUnavailable {
            camera_id: self.camera_id,
            details: details.to_string(),
        }
    }
}

/// Per-camera detection loop: frame → classifier → risk → alerts → recorder.
///
/// Owns the camera's frame source and recorder exclusively. Frames are
/// handled one at a time in capture order.
pub struct CameraWorker {
    spec: CameraSpec,
    source: Box<dyn FrameSource>,
    recorder: Recorder,
    context: Arc<PipelineContext>,
    status: Arc<watch::Sender<WorkerStatus>>,
    commands: mpsc::Receiver<WorkerCommand>,
    burst: BurstWindow,
    last_frame: Instant,
    last_qualifying: Option<Instant>,
    live: bool,
    frames_processed: u64,
    stop_reply: Option<oneshot::Sender<()>>,
}

impl CameraWorker {
    /// Start the loop for a source that is already open
    pub fn spawn(
        spec: CameraSpec,
        source: Box<dyn FrameSource>,
        context: Arc<PipelineContext>,
        status: Arc<watch::Sender<WorkerStatus>>,
    ) -> WorkerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let camera_id = spec.id;

        let recorder = Recorder::new(
            spec.id,
            spec.display_name.clone(),
            context.recording_dir.clone(),
            context.codecs.clone(),
            Arc::clone(&context.writer_factory),
        );

        let worker = Self {
            burst: BurstWindow::new(Duration::from_secs(context.alerts.burst_window_seconds)),
            spec,
            source,
            recorder,
            context,
            status,
            commands: command_rx,
            last_frame: Instant::now(),
            last_qualifying: None,
            live: true,
            frames_processed: 0,
            stop_reply: None,
        };

        let status = Arc::clone(&worker.status);
        let event_bus = Arc::clone(&worker.context.event_bus);
        let task = tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(worker.run()).catch_unwind().await {
                let details = panic_message(panic.as_ref());
                error!("Camera {} worker panicked: {}", camera_id, details);

                status.send_modify(|status| {
                    status.phase = CameraPhase::Idle;
                    status.live = false;
                    status.recording = None;
                });
                let _ = event_bus
                    .publish(WildwatchEvent::SystemError {
                        component: format!("camera_{}", camera_id),
                        error: format!("worker panicked: {}", details),
                    })
                    .await;
            }
        });

        WorkerHandle {
            camera_id,
            commands: command_tx,
            task,
        }
    }

    async fn run(mut self) {
        info!(
            "Camera {} worker started ({})",
            self.spec.id,
            self.source.describe()
        );

        self.status.send_modify(|status| {
            status.phase = CameraPhase::Running;
            status.live = true;
        });
        self.publish_status(true).await;

        let frame_timeout = self.context.frame_timeout;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Camera {} command channel closed", self.spec.id);
                        break;
                    }
                },
                frame = self.source.next_frame(frame_timeout) => match frame {
                    Some(frame) => self.process_frame(frame).await,
                    None => self.handle_no_frame().await,
                },
            }

            if self.stop_reply.is_some() {
                break;
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Stop { reply } => {
                info!("Camera {} worker stopping", self.spec.id);
                self.stop_reply = Some(reply);
            }
            WorkerCommand::StartRecording { reply } => {
                let result = self.start_recording(false).await;
                let _ = reply.send(result);
            }
            WorkerCommand::StopRecording { reply } => {
                let summary = self.stop_recording().await;
                let _ = reply.send(summary);
            }
        }
    }

    /// Handle commands that queued up while a frame was in flight
    async fn drain_commands(&mut self) {
        while self.stop_reply.is_none() {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command).await,
                Err(_) => break,
            }
        }
    }

    async fn process_frame(&mut self, frame: FrameData) {
        let now = Instant::now();
        self.last_frame = now;
        if !self.live {
            info!("Camera {} feed recovered", self.spec.id);
            self.live = true;
            self.publish_status(true).await;
        }

        let result = self.context.analyze(Some(self.spec.id), &frame).await;

        self.drain_commands().await;
        if self.stop_reply.is_some() {
            debug!(
                "Camera {} discarding result of frame {} after stop",
                self.spec.id, frame.id
            );
            return;
        }

        let max_tier = result.max_tier();
        trace!(
            "Camera {} frame {}: {} detections, max tier {}",
            self.spec.id,
            frame.id,
            result.len(),
            max_tier
        );

        for entry in &result.detections {
            if let Err(e) = self
                .context
                .store
                .record_detection(self.spec.id, frame.id, entry)
                .await
            {
                warn!("Camera {}: failed to record detection: {}", self.spec.id, e);
            }
        }

        let _ = self
            .context
            .event_bus
            .publish(WildwatchEvent::FrameAnalyzed {
                camera_id: self.spec.id,
                frame_id: frame.id,
                detection_count: result.len(),
                max_tier,
                timestamp: frame.timestamp,
            })
            .await;

        self.burst.record(max_tier, now);
        self.apply_alert_rules(&result, now).await;
        self.apply_auto_recording(max_tier, now).await;

        if let Some(closed) = self.recorder.write_frame(&frame) {
            warn!(
                "Camera {} recording {} closed after a writer error",
                self.spec.id,
                closed.path.display()
            );
            self.publish_recording_stopped(&closed).await;
        }

        self.frames_processed += 1;
        let frames_processed = self.frames_processed;
        let frames_dropped = self.source.stats().frames_dropped;
        let recording = self.recorder.current().cloned();
        self.status.send_modify(|status| {
            status.live = true;
            status.frames_processed = frames_processed;
            status.frames_dropped = frames_dropped;
            status.last_frame_at = Some(result.captured_at);
            status.last_max_tier = max_tier;
            status.recording = recording;
        });
    }

    async fn apply_alert_rules(&self, result: &FrameResult, now: Instant) {
        let alerts = &self.context.alerts;
        let dispatcher = &self.context.dispatcher;
        let camera_id = self.spec.id;

        let high_count = self.burst.count(DangerTier::High);
        if high_count >= alerts.burst_threshold {
            if let Some(entry) = result
                .detections
                .iter()
                .find(|entry| entry.assessment.tier == DangerTier::High)
            {
                dispatcher
                    .fire(AlertRequest::danger(camera_id, entry, high_count), now)
                    .await;
            }
        }

        let near_human = result.detections.iter().find(|entry| {
            entry.assessment.tier == DangerTier::Human
                && entry.assessment.distance_known()
                && entry.assessment.distance_cm <= alerts.proximity_cm
        });
        if let Some(entry) = near_human {
            dispatcher
                .fire(AlertRequest::proximity(camera_id, entry), now)
                .await;
        }

        let (lower, upper) = alerts.medium_band_cm;
        let medium_in_band = result.detections.iter().find(|entry| {
            entry.assessment.tier == DangerTier::Medium
                && entry.assessment.distance_known()
                && entry.assessment.distance_cm > lower
                && entry.assessment.distance_cm <= upper
        });
        if let Some(entry) = medium_in_band {
            dispatcher
                .fire(AlertRequest::medium(camera_id, entry), now)
                .await;
        }
    }

    async fn apply_auto_recording(&mut self, max_tier: DangerTier, now: Instant) {
        let Some(threshold) = self.context.auto_record_tier else {
            return;
        };

        if max_tier != DangerTier::None && max_tier.at_least(threshold) {
            self.last_qualifying = Some(now);
            if !self.recorder.is_recording() {
                if let Err(e) = self.start_recording(true).await {
                    warn!("Camera {}: automatic recording failed: {}", self.spec.id, e);
                }
            }
        } else {
            self.check_postroll(now).await;
        }
    }

    /// Close an automatic session once no qualifying frame has arrived for
    /// the post-roll period
    async fn check_postroll(&mut self, now: Instant) {
        let automatic = self
            .recorder
            .current()
            .is_some_and(|info| info.automatic);
        if !automatic {
            return;
        }

        let quiet_for = self
            .last_qualifying
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        if quiet_for >= self.context.postroll {
            info!(
                "Camera {}: no qualifying activity for {:?}, stopping recording",
                self.spec.id, self.context.postroll
            );
            self.stop_recording().await;
        }
    }

    async fn handle_no_frame(&mut self) {
        let now = Instant::now();
        self.check_postroll(now).await;

        if !self.live || now.saturating_duration_since(self.last_frame) < self.context.stale_after
        {
            return;
        }

        warn!(
            "Camera {}: no frames for {:?}, feed considered lost",
            self.spec.id, self.context.stale_after
        );
        self.live = false;
        self.context
            .dispatcher
            .fire(AlertRequest::system(Some(self.spec.id), "camera feed lost"), now)
            .await;

        self.status.send_modify(|status| status.live = false);
        self.publish_status(true).await;
    }

    async fn start_recording(
        &mut self,
        automatic: bool,
    ) -> std::result::Result<RecordingInfo, RecorderError> {
        let format = self.source.format();
        let info = self
            .recorder
            .start(format.width, format.height, format.fps, automatic)?;

        if automatic {
            self.last_qualifying = Some(Instant::now());
        }

        let recording = info.clone();
        self.status
            .send_modify(|status| status.recording = Some(recording));

        let _ = self
            .context
            .event_bus
            .publish(WildwatchEvent::RecordingStarted {
                camera_id: self.spec.id,
                path: info.path.display().to_string(),
                codec: info.codec.name().to_string(),
                automatic,
            })
            .await;

        Ok(info)
    }

    async fn stop_recording(&mut self) -> Option<RecordingSummary> {
        let summary = self.recorder.stop()?;
        self.publish_recording_stopped(&summary).await;
        Some(summary)
    }

    async fn publish_recording_stopped(&self, summary: &RecordingSummary) {
        self.status.send_modify(|status| status.recording = None);

        let _ = self
            .context
            .event_bus
            .publish(WildwatchEvent::RecordingStopped {
                camera_id: self.spec.id,
                path: summary.path.display().to_string(),
                frames_written: summary.frames_written,
            })
            .await;
    }

    async fn publish_status(&self, active: bool) {
        let _ = self
            .context
            .event_bus
            .publish(WildwatchEvent::CameraStatusChanged {
                camera_id: self.spec.id,
                active,
                live: self.live && active,
                timestamp: SystemTime::now(),
            })
            .await;
    }

    async fn shutdown(mut self) {
        self.stop_recording().await;
        self.source.close().await;

        self.live = false;
        self.status.send_modify(|status| {
            status.live = false;
            status.recording = None;
        });
        self.publish_status(false).await;

        info!(
            "Camera {} worker stopped after {} frames",
            self.spec.id, self.frames_processed
        );

        if let Some(reply) = self.stop_reply.take() {
            let _ = reply.send(());
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
