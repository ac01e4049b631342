use super::types::{DangerTier, Detection, RiskAssessment, DISTANCE_INDETERMINATE};
use crate::config::RiskConfig;

const MIN_DISTANCE_CM: f64 = 10.0;
const MAX_DISTANCE_CM: f64 = 1000.0;

/// Maps a detection to a danger tier and a pinhole-model distance estimate.
///
/// Word lists are lowercased once at construction. A list matches when any of
/// its words occurs as a substring of the lowercased label, and lists are
/// checked in the order dangerous, moderate, low risk, human.
#[derive(Debug, Clone)]
pub struct RiskEvaluator {
    tiers: Vec<(DangerTier, Vec<String>)>,
    assumed_object_width_cm: f64,
    focal_length_px: f64,
}

impl RiskEvaluator {
    pub fn new(config: &RiskConfig) -> Self {
        let normalize = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|word| word.trim().to_lowercase())
                .filter(|word| !word.is_empty())
                .collect()
        };

        Self {
            tiers: vec![
                (DangerTier::High, normalize(&config.dangerous)),
                (DangerTier::Medium, normalize(&config.moderate)),
                (DangerTier::Low, normalize(&config.low_risk)),
                (DangerTier::Human, normalize(&config.human)),
            ],
            assumed_object_width_cm: config.assumed_object_width_cm,
            focal_length_px: config.focal_length_px,
        }
    }

    pub fn evaluate(&self, detection: &Detection) -> RiskAssessment {
        RiskAssessment {
            tier: self.tier_for(&detection.label),
            distance_cm: self.distance_for(detection.bbox.width(), detection.bbox.height()),
        }
    }

    pub fn tier_for(&self, label: &str) -> DangerTier {
        let label = label.to_lowercase();
        self.tiers
            .iter()
            .find(|(_, words)| words.iter().any(|word| label.contains(word.as_str())))
            .map(|(tier, _)| *tier)
            .unwrap_or(DangerTier::Unknown)
    }

    pub fn distance_for(&self, pixel_width: f32, pixel_height: f32) -> u32 {
        if pixel_width <= 0.0 || !pixel_width.is_finite() {
            return DISTANCE_INDETERMINATE;
        }

        let size = f64::from(pixel_width.max(pixel_height));
        let raw = (self.assumed_object_width_cm * self.focal_length_px) / size;
        if raw.is_nan() {
            return DISTANCE_INDETERMINATE;
        }

        raw.clamp(MIN_DISTANCE_CM, MAX_DISTANCE_CM) as u32
    }
}

impl Default for RiskEvaluator {
    fn default() -> Self {
        Self::new(&RiskConfig::default())
    }
}
