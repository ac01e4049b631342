use crate::error::RecorderError;
use crate::frame::FrameData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Recording codec, tried in preference order when a session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecCandidate {
    Vp8,
    Vp9,
    Mjpeg,
    Xvid,
    /// Concatenated JPEG frames written without a container
    MjpegStream,
}

impl CodecCandidate {
    pub const DEFAULT_PREFERENCE: [CodecCandidate; 5] = [
        CodecCandidate::Vp8,
        CodecCandidate::Vp9,
        CodecCandidate::Mjpeg,
        CodecCandidate::Xvid,
        CodecCandidate::MjpegStream,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CodecCandidate::Vp8 => "vp8",
            CodecCandidate::Vp9 => "vp9",
            CodecCandidate::Mjpeg => "mjpeg",
            CodecCandidate::Xvid => "xvid",
            CodecCandidate::MjpegStream => "mjpeg_stream",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::DEFAULT_PREFERENCE
            .into_iter()
            .find(|codec| codec.name() == name)
    }

    /// File extension of the container
    pub fn extension(&self) -> &'static str {
        match self {
            CodecCandidate::Vp8 | CodecCandidate::Vp9 => "webm",
            CodecCandidate::Mjpeg | CodecCandidate::Xvid => "avi",
            CodecCandidate::MjpegStream => "mjpeg",
        }
    }

    /// Encoder and muxer stage fed by decoded raw video, or by JPEG for
    /// codecs that keep the camera's JPEG frames as-is
    #[cfg_attr(not(all(target_os = "linux", feature = "video_encoding")), allow(dead_code))]
    fn gst_stages(&self) -> Option<&'static str> {
        match self {
            CodecCandidate::Vp8 => Some("jpegdec ! videoconvert ! vp8enc deadline=1 ! webmmux"),
            CodecCandidate::Vp9 => Some("jpegdec ! videoconvert ! vp9enc deadline=1 ! webmmux"),
            CodecCandidate::Mjpeg => Some("avimux"),
            CodecCandidate::Xvid => Some("jpegdec ! videoconvert ! avenc_mpeg4 ! avimux"),
            CodecCandidate::MjpegStream => None,
        }
    }
}

impl fmt::Display for CodecCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a writer is asked to open
#[derive(Debug, Clone)]
pub struct WriterSpec {
    pub path: PathBuf,
    pub codec: CodecCandidate,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// An open recording file
pub trait VideoWriter: Send + Sync {
    fn write_frame(&mut self, frame: &FrameData) -> Result<(), RecorderError>;

    /// Flush and close; the writer is not used afterwards
    fn close(&mut self) -> Result<(), RecorderError>;
}

/// Opens writers for codec candidates
pub trait VideoWriterFactory: Send + Sync {
    fn open(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>, RecorderError>;
}

/// Raw JPEG stream writer; always available
pub struct MjpegStreamWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl MjpegStreamWriter {
    pub fn create(path: &Path) -> Result<Self, RecorderError> {
        let file = File::create(path).map_err(|e| RecorderError::Writer {
            details: format!("Failed to create {}: {}", path.display(), e),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(BufWriter::new(file)),
        })
    }
}

impl VideoWriter for MjpegStreamWriter {
    fn write_frame(&mut self, frame: &FrameData) -> Result<(), RecorderError> {
        let file = self.file.as_mut().ok_or_else(|| RecorderError::Writer {
            details: format!("{} is already closed", self.path.display()),
        })?;

        file.write_all(&frame.data).map_err(|e| RecorderError::Writer {
            details: format!("Failed to write {}: {}", self.path.display(), e),
        })
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| RecorderError::Writer {
                details: format!("Failed to flush {}: {}", self.path.display(), e),
            })?;
        }
        Ok(())
    }
}

/// Writers backed by GStreamer encoders where available, plus the raw
/// JPEG stream writer
#[derive(Debug, Default, Clone)]
pub struct DefaultWriterFactory;

impl VideoWriterFactory for DefaultWriterFactory {
    fn open(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>, RecorderError> {
        if spec.codec == CodecCandidate::MjpegStream {
            return Ok(Box::new(MjpegStreamWriter::create(&spec.path)?));
        }

        #[cfg(all(target_os = "linux", feature = "video_encoding"))]
        {
            Ok(Box::new(gst_writer::GstVideoWriter::open(spec)?))
        }

        #[cfg(not(all(target_os = "linux", feature = "video_encoding")))]
        {
            tracing::debug!("Codec {} needs video encoding support", spec.codec);
            Err(RecorderError::UnsupportedCodec {
                codec: spec.codec.name().to_string(),
            })
        }
    }
}

#[cfg(all(target_os = "linux", feature = "video_encoding"))]
mod gst_writer {
    use super::{VideoWriter, WriterSpec};
    use crate::error::RecorderError;
    use crate::frame::FrameData;
    use gstreamer::prelude::*;
    use gstreamer::Pipeline;
    use gstreamer_app::AppSrc;
    use std::time::{Duration, SystemTime};
    use tracing::{debug, info, warn};

    const EOS_TIMEOUT_SECS: u64 = 5;

    fn writer_error(codec: &str, details: String) -> RecorderError {
        RecorderError::Writer {
            details: format!("[{}] {}", codec, details),
        }
    }

    /// `appsrc(image/jpeg) ! jpegparse ! <encoder> ! <muxer> ! filesink`
    pub(super) struct GstVideoWriter {
        label: &'static str,
        pipeline: Option<Pipeline>,
        appsrc: AppSrc,
        base_time: Option<SystemTime>,
        frame_duration: Duration,
    }

    impl GstVideoWriter {
        pub(super) fn open(spec: &WriterSpec) -> Result<Self, RecorderError> {
            let label = spec.codec.name();
            let stages = spec.codec.gst_stages().ok_or_else(|| RecorderError::UnsupportedCodec {
                codec: label.to_string(),
            })?;

            gstreamer::init()
                .map_err(|e| writer_error(label, format!("Failed to initialize GStreamer: {}", e)))?;

            let fps = spec.fps.max(1);
            let pipeline_desc = format!(
                "appsrc name=src format=time is-live=true do-timestamp=false \
                 caps=image/jpeg,width={},height={},framerate={}/1 ! \
                 jpegparse ! {} ! filesink location=\"{}\"",
                spec.width,
                spec.height,
                fps,
                stages,
                spec.path.to_string_lossy()
            );
            debug!("Recording pipeline ({}): {}", label, pipeline_desc);

            let pipeline = gstreamer::parse::launch(&pipeline_desc)
                .map_err(|e| writer_error(label, format!("Failed to create pipeline: {}", e)))?
                .downcast::<Pipeline>()
                .map_err(|_| writer_error(label, "Failed to downcast to Pipeline".to_string()))?;

            let appsrc = pipeline
                .by_name("src")
                .ok_or_else(|| writer_error(label, "Failed to get appsrc element".to_string()))?
                .downcast::<AppSrc>()
                .map_err(|_| writer_error(label, "Failed to downcast to AppSrc".to_string()))?;

            if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(writer_error(label, format!("Failed to start pipeline: {}", e)));
            }

            info!("Opened {} writer at {}", label, spec.path.display());

            Ok(Self {
                label,
                pipeline: Some(pipeline),
                appsrc,
                base_time: None,
                frame_duration: Duration::from_nanos(1_000_000_000 / u64::from(fps)),
            })
        }
    }

    impl VideoWriter for GstVideoWriter {
        fn write_frame(&mut self, frame: &FrameData) -> Result<(), RecorderError> {
            if self.pipeline.is_none() {
                return Err(writer_error(self.label, "writer is closed".to_string()));
            }

            let base = *self.base_time.get_or_insert(frame.timestamp);
            let relative = frame.timestamp.duration_since(base).unwrap_or(Duration::ZERO);

            let mut buffer = gstreamer::Buffer::from_slice(frame.data.as_ref().clone());
            {
                let buffer_ref = buffer.get_mut().ok_or_else(|| {
                    writer_error(self.label, "Failed to access buffer".to_string())
                })?;
                buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(relative.as_nanos() as u64));
                buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(
                    self.frame_duration.as_nanos() as u64,
                ));
            }

            self.appsrc
                .push_buffer(buffer)
                .map(|_| ())
                .map_err(|e| writer_error(self.label, format!("Failed to push buffer: {:?}", e)))
        }

        fn close(&mut self) -> Result<(), RecorderError> {
            let Some(pipeline) = self.pipeline.take() else {
                return Ok(());
            };

            if let Err(e) = self.appsrc.end_of_stream() {
                warn!("[{}] Failed to signal EOS: {:?}", self.label, e);
            }

            let mut result = Ok(());
            if let Some(bus) = pipeline.bus() {
                for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
                    match msg.view() {
                        gstreamer::MessageView::Eos(..) => break,
                        gstreamer::MessageView::Error(err) => {
                            result = Err(writer_error(
                                self.label,
                                format!(
                                    "Encoding error: {} ({})",
                                    err.error(),
                                    err.debug().unwrap_or_default()
                                ),
                            ));
                            break;
                        }
                        _ => {}
                    }
                }
            }

            pipeline.set_state(gstreamer::State::Null).map_err(|e| {
                writer_error(self.label, format!("Failed to stop pipeline: {}", e))
            })?;

            result
        }
    }

    impl Drop for GstVideoWriter {
        fn drop(&mut self) {
            if let Some(pipeline) = self.pipeline.take() {
                let _ = pipeline.set_state(gstreamer::State::Null);
            }
        }
    }
}
