use super::codec::{CodecCandidate, VideoWriter, VideoWriterFactory, WriterSpec};
use crate::error::RecorderError;
use crate::frame::FrameData;
use crate::registry::CameraId;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Public view of an open session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub codec: CodecCandidate,
    pub started_at: DateTime<Utc>,
    pub automatic: bool,
}

/// What was written by a session that just closed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub codec: CodecCandidate,
    pub started_at: DateTime<Utc>,
    pub frames_written: u64,
}

/// The one open writer of a camera
pub struct RecordingSession {
    info: RecordingInfo,
    writer: Box<dyn VideoWriter>,
    frames_written: u64,
}

impl RecordingSession {
    pub fn info(&self) -> &RecordingInfo {
        &self.info
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn close(mut self) -> RecordingSummary {
        if let Err(e) = self.writer.close() {
            warn!("Error closing {}: {}", self.info.path.display(), e);
        }

        RecordingSummary {
            path: self.info.path,
            codec: self.info.codec,
            started_at: self.info.started_at,
            frames_written: self.frames_written,
        }
    }
}

/// Per-camera recording state machine (not recording / recording).
///
/// Owned exclusively by the camera's worker, so at most one writer is ever
/// open for the camera.
pub struct Recorder {
    camera_id: CameraId,
    display_name: String,
    directory: PathBuf,
    candidates: Vec<CodecCandidate>,
    factory: Arc<dyn VideoWriterFactory>,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(
        camera_id: CameraId,
        display_name: impl Into<String>,
        directory: impl Into<PathBuf>,
        candidates: Vec<CodecCandidate>,
        factory: Arc<dyn VideoWriterFactory>,
    ) -> Self {
        Self {
            camera_id,
            display_name: display_name.into(),
            directory: directory.into(),
            candidates,
            factory,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn current(&self) -> Option<&RecordingInfo> {
        self.session.as_ref().map(RecordingSession::info)
    }

    /// Open a writer with the first codec candidate that works.
    ///
    /// Fails while a session is already open; the open session is untouched.
    pub fn start(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        automatic: bool,
    ) -> Result<RecordingInfo, RecorderError> {
        if let Some(session) = &self.session {
            return Err(RecorderError::AlreadyRecording {
                camera: self.display_name.clone(),
                path: session.info.path.display().to_string(),
            });
        }

        std::fs::create_dir_all(&self.directory).map_err(|e| RecorderError::Writer {
            details: format!("Failed to create {}: {}", self.directory.display(), e),
        })?;

        let started_at = Utc::now();
        let stem = format!(
            "{}_{}",
            self.display_name,
            started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S")
        );

        let mut tried = Vec::new();
        for codec in &self.candidates {
            let path = unique_path(&self.directory, &stem, codec.extension());
            let spec = WriterSpec {
                path: path.clone(),
                codec: *codec,
                width,
                height,
                fps,
            };

            match self.factory.open(&spec) {
                Ok(writer) => {
                    let info = RecordingInfo {
                        path,
                        codec: *codec,
                        started_at,
                        automatic,
                    };
                    info!(
                        "Camera {} recording to {} ({})",
                        self.camera_id,
                        info.path.display(),
                        codec
                    );
                    self.session = Some(RecordingSession {
                        info: info.clone(),
                        writer,
                        frames_written: 0,
                    });
                    return Ok(info);
                }
                Err(e) => {
                    debug!("Camera {} codec {} unavailable: {}", self.camera_id, codec, e);
                    remove_partial(&path);
                    tried.push(codec.name());
                }
            }
        }

        error!(
            "Camera {} could not open any recording codec",
            self.camera_id
        );
        Err(RecorderError::NoCodecAvailable {
            camera: self.display_name.clone(),
            tried: tried.join(", "),
        })
    }

    /// Close the open session, if any
    pub fn stop(&mut self) -> Option<RecordingSummary> {
        let session = self.session.take()?;
        let summary = session.close();
        info!(
            "Camera {} recording stopped: {} ({} frames)",
            self.camera_id,
            summary.path.display(),
            summary.frames_written
        );
        Some(summary)
    }

    /// Append a frame while recording; a no-op otherwise.
    ///
    /// A writer error closes the session, and its summary is returned.
    pub fn write_frame(&mut self, frame: &FrameData) -> Option<RecordingSummary> {
        let session = self.session.as_mut()?;

        match session.writer.write_frame(frame) {
            Ok(()) => {
                session.frames_written += 1;
                None
            }
            Err(e) => {
                error!(
                    "Camera {} recording to {} failed: {}",
                    self.camera_id,
                    session.info.path.display(),
                    e
                );
                self.session.take().map(RecordingSession::close)
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn unique_path(directory: &Path, stem: &str, extension: &str) -> PathBuf {
    let first = directory.join(format!("{}.{}", stem, extension));
    if !first.exists() {
        return first;
    }

    (1..)
        .map(|n| directory.join(format!("{}_{}.{}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove partial recording {}: {}", path.display(), e);
        }
    }
}
