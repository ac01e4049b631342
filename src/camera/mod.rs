#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst;
pub mod source;
#[cfg(test)]
mod tests;

pub use source::{
    ChannelFrameSource, DefaultFrameSourceFactory, FrameFeeder, FrameSource, FrameSourceFactory,
    SourceFormat, SyntheticFrameSource,
};

use crate::config::WildwatchConfig;
use crate::registry::CameraId;

/// Source name selecting generated frames instead of a device
pub const SYNTHETIC_SOURCE: &str = "synthetic";

/// Everything needed to open one camera, resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSpec {
    pub id: CameraId,
    pub display_name: String,
    /// Device path, bare V4L2 index, stream URI or [`SYNTHETIC_SOURCE`]
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CameraSpec {
    /// Shared camera defaults overlaid with the matching `[[cameras]]` entry.
    /// Unlisted ids get `/dev/video<id>`.
    pub fn resolve(config: &WildwatchConfig, id: CameraId) -> Self {
        let entry = config.camera_entry(id);
        let base_name = entry
            .and_then(|entry| entry.name.clone())
            .unwrap_or_else(|| config.camera.name.clone());
        let source = entry
            .and_then(|entry| entry.source.clone())
            .unwrap_or_else(|| format!("/dev/video{}", id));

        Self {
            id,
            display_name: format!("{}_{}", base_name, id),
            source,
            width: config.camera.resolution.0,
            height: config.camera.resolution.1,
            fps: config.camera.fps,
        }
    }

    pub fn format(&self) -> SourceFormat {
        SourceFormat {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}
