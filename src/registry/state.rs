use crate::camera::CameraSpec;
use crate::detection::DangerTier;
use crate::pipeline::WorkerStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Numeric camera identifier, also the default V4L2 index
pub type CameraId = u32;

/// Lifecycle of a camera's worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPhase {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for CameraPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPhase::Idle => write!(f, "idle"),
            CameraPhase::Running => write!(f, "running"),
            CameraPhase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Externally visible state of one registered camera
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraState {
    pub id: CameraId,
    pub display_name: String,
    pub source: String,
    pub is_active: bool,
    pub is_recording: bool,
    pub phase: CameraPhase,
    pub live: bool,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_max_tier: DangerTier,
    pub recording_path: Option<PathBuf>,
}

impl CameraState {
    pub(crate) fn from_status(spec: &CameraSpec, status: &WorkerStatus) -> Self {
        Self {
            id: spec.id,
            display_name: spec.display_name.clone(),
            source: spec.source.clone(),
            is_active: status.phase == CameraPhase::Running,
            is_recording: status.recording.is_some(),
            phase: status.phase,
            live: status.live,
            frames_processed: status.frames_processed,
            frames_dropped: status.frames_dropped,
            last_frame_at: status.last_frame_at,
            last_max_tier: status.last_max_tier,
            recording_path: status.recording.as_ref().map(|info| info.path.clone()),
        }
    }
}
