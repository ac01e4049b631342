use super::source::{FrameSource, SourceFormat};
use super::CameraSpec;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use crate::frame_slot::{FrameSlot, FrameSlotStatsSnapshot, StallWatchdog};
use crate::registry::CameraId;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

/// GStreamer capture of a V4L2 device or a stream URI, delivered as JPEG
pub struct GstFrameSource {
    camera_id: CameraId,
    source: String,
    format: SourceFormat,
    pipeline: Pipeline,
    slot: Arc<FrameSlot>,
    frame_counter: Arc<AtomicU64>,
    cancel: CancellationToken,
    capture_task: Option<tokio::task::JoinHandle<()>>,
}

impl GstFrameSource {
    pub fn new(spec: &CameraSpec) -> Result<Self, CameraError> {
        info!(
            "Initializing GStreamer capture for camera {} from {} ({}x{} @ {}fps)",
            spec.id, spec.source, spec.width, spec.height, spec.fps
        );

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = build_pipeline_string(spec);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::DeviceOpen {
                camera_id: spec.id,
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        Ok(Self {
            camera_id: spec.id,
            source: spec.source.clone(),
            format: spec.format(),
            pipeline,
            slot: Arc::new(FrameSlot::new()),
            frame_counter: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            capture_task: None,
        })
    }

    fn process_sample(
        sample: gstreamer::Sample,
        frame_counter: &AtomicU64,
        slot: &FrameSlot,
    ) -> Result<(), CameraError> {
        let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
            details: "No buffer in sample".to_string(),
        })?;

        let caps = sample.caps().ok_or_else(|| CameraError::CaptureStream {
            details: "No caps in sample".to_string(),
        })?;

        let video_info = VideoInfo::from_caps(caps).map_err(|e| CameraError::CaptureStream {
            details: format!("Failed to get video info: {}", e),
        })?;

        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::CaptureStream {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let frame_id = frame_counter.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Captured frame {} ({}x{}, {} bytes)",
            frame_id,
            video_info.width(),
            video_info.height(),
            map.len()
        );

        slot.push(FrameData::new(
            frame_id,
            SystemTime::now(),
            map.as_slice().to_vec(),
            video_info.width(),
            video_info.height(),
            FrameFormat::Mjpeg,
        ));
        Ok(())
    }
}

/// `v4l2src` for device paths and bare indices, `uridecodebin` for URIs
fn build_pipeline_string(spec: &CameraSpec) -> String {
    let (width, height, fps) = (spec.width, spec.height, spec.fps);
    let sink = "appsink name=sink sync=false max-buffers=2 drop=true qos=false \
                enable-last-sample=false emit-signals=false";

    if spec.source.contains("://") {
        format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! videoscale ! videorate ! \
             video/x-raw,width={},height={},framerate={}/1 ! \
             jpegenc ! queue max-size-buffers=4 leaky=downstream ! {}",
            spec.source, width, height, fps, sink
        )
    } else {
        let device = if spec.source.chars().all(|c| c.is_ascii_digit()) {
            format!("/dev/video{}", spec.source)
        } else {
            spec.source.clone()
        };
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! {}",
            device, width, height, fps, sink
        )
    }
}

#[async_trait]
impl FrameSource for GstFrameSource {
    async fn open(&mut self) -> Result<(), CameraError> {
        if self.capture_task.is_some() {
            warn!("Camera {} capture is already running", self.camera_id);
            return Ok(());
        }

        let appsink = self
            .pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "Failed to get appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        // Samples go straight into the single slot from the streaming thread
        let camera_id = self.camera_id;
        let callback_slot = Arc::clone(&self.slot);
        let frame_counter = Arc::clone(&self.frame_counter);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    if let Err(e) = Self::process_sample(sample, &frame_counter, &callback_slot) {
                        error!("Camera {}: error processing sample: {}", camera_id, e);
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::DeviceOpen {
                camera_id: self.camera_id,
                details: format!("Failed to start pipeline for {}: {}", self.source, e),
            })?;

        info!("Camera {} GStreamer pipeline started", self.camera_id);

        let pipeline = self.pipeline.clone();
        let slot = Arc::clone(&self.slot);
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut watchdog = StallWatchdog::new(WATCHDOG_TIMEOUT, Instant::now());
            let mut watchdog_interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = watchdog_interval.tick() => {
                        if watchdog.check(slot.stats(), Instant::now()) {
                            warn!(
                                "Camera {}: no frames received for {:?}; restarting pipeline",
                                camera_id, WATCHDOG_TIMEOUT
                            );
                            let _ = pipeline.set_state(gstreamer::State::Null);
                            if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
                                error!("Camera {}: failed to restart pipeline: {}", camera_id, e);
                            }
                        }
                    }
                }
            }

            let _ = pipeline.set_state(gstreamer::State::Null);
            info!("Camera {} capture watchdog stopped", camera_id);
        });

        self.capture_task = Some(task);
        Ok(())
    }

    async fn next_frame(&mut self, timeout: Duration) -> Option<FrameData> {
        self.slot.take(timeout).await
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        self.slot.close();

        if let Some(task) = self.capture_task.take() {
            match tokio::time::timeout(Duration::from_secs(3), task).await {
                Ok(Ok(())) => debug!("Camera {} capture task completed", self.camera_id),
                Ok(Err(e)) => error!("Error waiting for camera {} capture task: {}", self.camera_id, e),
                Err(_) => warn!(
                    "Camera {} capture task did not complete within timeout",
                    self.camera_id
                ),
            }
        }

        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }

    fn format(&self) -> SourceFormat {
        self.format
    }

    fn stats(&self) -> FrameSlotStatsSnapshot {
        self.slot.stats()
    }

    fn describe(&self) -> String {
        self.source.clone()
    }
}
