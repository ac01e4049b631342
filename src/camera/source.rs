use super::CameraSpec;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use crate::frame_slot::{FrameSlot, FrameSlotStatsSnapshot};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Native capture parameters of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl SourceFormat {
    /// Time between frames; never zero
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// One camera device or stream.
///
/// Frames flow through a single-slot buffer, so a consumer that falls behind
/// only ever sees the newest frame.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Start producing frames
    async fn open(&mut self) -> Result<(), CameraError>;

    /// Next frame, waiting at most `timeout`. `None` is not an error.
    async fn next_frame(&mut self, timeout: Duration) -> Option<FrameData>;

    /// Stop producing frames and release the device
    async fn close(&mut self);

    fn format(&self) -> SourceFormat;

    fn stats(&self) -> FrameSlotStatsSnapshot;

    fn describe(&self) -> String;
}

/// Creates the frame source for a camera when it starts
pub trait FrameSourceFactory: Send + Sync {
    fn create(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Hands frames to a [`ChannelFrameSource`] from outside the worker
#[derive(Clone)]
pub struct FrameFeeder {
    slot: Arc<FrameSlot>,
    frame_counter: Arc<AtomicU64>,
    format: SourceFormat,
}

impl FrameFeeder {
    /// Push JPEG bytes as the next frame and return its id
    pub fn push(&self, data: Vec<u8>) -> u64 {
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        self.slot.push(FrameData::new(
            frame_id,
            SystemTime::now(),
            data,
            self.format.width,
            self.format.height,
            FrameFormat::Mjpeg,
        ));
        frame_id
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }
}

/// Source fed by a [`FrameFeeder`]; used for externally delivered frames
/// and for driving the pipeline in tests
pub struct ChannelFrameSource {
    name: String,
    slot: Arc<FrameSlot>,
    format: SourceFormat,
}

impl ChannelFrameSource {
    pub fn new(name: impl Into<String>, format: SourceFormat) -> (Self, FrameFeeder) {
        let slot = Arc::new(FrameSlot::new());
        let feeder = FrameFeeder {
            slot: Arc::clone(&slot),
            frame_counter: Arc::new(AtomicU64::new(0)),
            format,
        };
        (
            Self {
                name: name.into(),
                slot,
                format,
            },
            feeder,
        )
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn open(&mut self) -> Result<(), CameraError> {
        if self.slot.is_closed() {
            return Err(CameraError::CaptureStream {
                details: format!("{} was already closed", self.name),
            });
        }
        debug!("Opened channel source {}", self.name);
        Ok(())
    }

    async fn next_frame(&mut self, timeout: Duration) -> Option<FrameData> {
        self.slot.take(timeout).await
    }

    async fn close(&mut self) {
        self.slot.close();
    }

    fn format(&self) -> SourceFormat {
        self.format
    }

    fn stats(&self) -> FrameSlotStatsSnapshot {
        self.slot.stats()
    }

    fn describe(&self) -> String {
        format!("channel:{}", self.name)
    }
}

/// Generates placeholder JPEG frames at the configured rate
pub struct SyntheticFrameSource {
    format: SourceFormat,
    slot: Arc<FrameSlot>,
    frame_counter: Arc<AtomicU64>,
    cancel: CancellationToken,
    capture_task: Option<tokio::task::JoinHandle<()>>,
}

impl SyntheticFrameSource {
    pub fn new(format: SourceFormat) -> Self {
        Self {
            format,
            slot: Arc::new(FrameSlot::new()),
            frame_counter: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            capture_task: None,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    /// Minimal JPEG-framed payload whose size varies per frame
    pub fn synthetic_jpeg(frame_id: u64) -> Vec<u8> {
        let mut data = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x01,
            0x00, 0x48, 0x00, 0x48, 0x00, 0x00,
        ];

        let pattern_size = 1000 + (frame_id % 500) as usize;
        let pattern_byte = (frame_id % 256) as u8;
        data.extend(vec![pattern_byte; pattern_size]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    async fn open(&mut self) -> Result<(), CameraError> {
        if self.capture_task.is_some() {
            warn!("Synthetic capture is already running");
            return Ok(());
        }

        let format = self.format;
        let slot = Arc::clone(&self.slot);
        let frame_counter = Arc::clone(&self.frame_counter);
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let frame_interval = format.frame_interval();
            let mut interval_timer = tokio::time::interval(frame_interval);

            info!("Synthetic capture loop started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval_timer.tick() => {}
                }

                let frame_id = frame_counter.fetch_add(1, Ordering::Relaxed);
                let data = Self::synthetic_jpeg(frame_id);
                let data_len = data.len();

                trace!(
                    "Generated synthetic frame {} ({}x{}, {} bytes)",
                    frame_id,
                    format.width,
                    format.height,
                    data_len
                );
                slot.push(FrameData::new(
                    frame_id,
                    SystemTime::now(),
                    data,
                    format.width,
                    format.height,
                    FrameFormat::Mjpeg,
                ));
            }

            info!("Synthetic capture loop stopped");
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
                Ok(Ok(())) => debug!("Synthetic capture task completed"),
                Ok(Err(e)) => error!("Error waiting for synthetic capture task: {}", e),
                Err(_) => warn!("Synthetic capture task did not complete within timeout"),
            }
        }
    }

    fn format(&self) -> SourceFormat {
        self.format
    }

    fn stats(&self) -> FrameSlotStatsSnapshot {
        self.slot.stats()
    }

    fn describe(&self) -> String {
        "synthetic".to_string()
    }
}

/// Picks GStreamer capture for devices and URLs when camera support is
/// compiled in, and the synthetic source otherwise
#[derive(Debug, Default, Clone)]
pub struct DefaultFrameSourceFactory;

impl FrameSourceFactory for DefaultFrameSourceFactory {
    fn create(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CameraError> {
        let format = spec.format();

        if spec.source.eq_ignore_ascii_case(super::SYNTHETIC_SOURCE) {
            return Ok(Box::new(SyntheticFrameSource::new(format)));
        }

        #[cfg(all(target_os = "linux", feature = "camera"))]
        {
            Ok(Box::new(super::gst::GstFrameSource::new(spec)?))
        }

        #[cfg(not(all(target_os = "linux", feature = "camera")))]
        {
            warn!(
                "Camera support not available; camera {} ({}) uses synthetic frames",
                spec.id, spec.source
            );
            Ok(Box::new(SyntheticFrameSource::new(format)))
        }
    }
}
