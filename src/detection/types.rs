use crate::registry::CameraId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance reported when the bounding box is too degenerate to estimate from
pub const DISTANCE_INDETERMINATE: u32 = 0;

/// Pixel-space bounding box (x1, y1, x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(coords: [f32; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }
}

/// One classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }
}

/// Coarse risk class of a single detection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerTier {
    #[default]
    None,
    Unknown,
    Human,
    Low,
    Medium,
    High,
}

impl DangerTier {
    pub const ALL: [DangerTier; 6] = [
        DangerTier::None,
        DangerTier::Unknown,
        DangerTier::Human,
        DangerTier::Low,
        DangerTier::Medium,
        DangerTier::High,
    ];

    /// Ordering used for a frame's maximum tier:
    /// High > Medium > Low > Human > Unknown > None
    pub fn rank(&self) -> u8 {
        match self {
            DangerTier::None => 0,
            DangerTier::Unknown => 1,
            DangerTier::Human => 2,
            DangerTier::Low => 3,
            DangerTier::Medium => 4,
            DangerTier::High => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DangerTier::None => "none",
            DangerTier::Unknown => "unknown",
            DangerTier::Human => "human",
            DangerTier::Low => "low",
            DangerTier::Medium => "medium",
            DangerTier::High => "high",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|tier| tier.as_str() == name)
    }

    pub fn at_least(&self, other: DangerTier) -> bool {
        self.rank() >= other.rank()
    }
}

impl fmt::Display for DangerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: DangerTier,
    /// Estimated distance in centimetres, or 0 when indeterminate
    pub distance_cm: u32,
}

impl RiskAssessment {
    pub fn distance_known(&self) -> bool {
        self.distance_cm != DISTANCE_INDETERMINATE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedDetection {
    pub detection: Detection,
    pub assessment: RiskAssessment,
}

/// All assessed detections of one processed frame, in classifier order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResult {
    pub camera_id: Option<CameraId>,
    pub frame_id: u64,
    pub captured_at: DateTime<Utc>,
    pub detections: Vec<AssessedDetection>,
}

impl FrameResult {
    pub fn empty(camera_id: Option<CameraId>, frame_id: u64, captured_at: DateTime<Utc>) -> Self {
        Self {
            camera_id,
            frame_id,
            captured_at,
            detections: Vec::new(),
        }
    }

    /// Highest-ranked tier in the frame; `None` when the frame is empty
    pub fn max_tier(&self) -> DangerTier {
        self.detections
            .iter()
            .map(|entry| entry.assessment.tier)
            .max_by_key(DangerTier::rank)
            .unwrap_or(DangerTier::None)
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}
