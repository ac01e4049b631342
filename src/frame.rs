use crate::error::ClassifierError;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const REENCODE_QUALITY: u8 = 90;

/// Frame format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// Frame data structure containing raw frame data and metadata
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Frame identifier, increasing per camera
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Build a JPEG frame from an uploaded image in any supported format.
    ///
    /// JPEG input is kept as-is; PNG and BMP are decoded and re-encoded.
    pub fn from_image_bytes(id: u64, bytes: &[u8]) -> Result<Self, ClassifierError> {
        let format = image::guess_format(bytes).map_err(|e| ClassifierError::InvalidImage {
            details: e.to_string(),
        })?;
        let decoded =
            image::load_from_memory(bytes).map_err(|e| ClassifierError::InvalidImage {
                details: e.to_string(),
            })?;

        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(ClassifierError::InvalidImage {
                details: "image has no pixels".to_string(),
            });
        }

        let data = if format == ImageFormat::Jpeg {
            bytes.to_vec()
        } else {
            let rgb = decoded.to_rgb8();
            let mut buf = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, REENCODE_QUALITY);
            encoder
                .encode_image(&rgb)
                .map_err(|e| ClassifierError::InvalidImage {
                    details: format!("JPEG re-encoding failed: {}", e),
                })?;
            buf
        };

        Ok(Self::new(
            id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Mjpeg,
        ))
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Check for JPEG start and end markers
    pub fn is_complete_jpeg(&self) -> bool {
        self.format == FrameFormat::Mjpeg
            && self.data.len() >= 4
            && self.data[..2] == JPEG_SOI
            && self.data[self.data.len() - 2..] == JPEG_EOI
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Check if frame is older than specified duration
    pub fn is_older_than(&self, duration: std::time::Duration) -> bool {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|age| age > duration)
            .unwrap_or(false)
    }
}
