pub mod classifier;
pub mod risk;
pub mod types;


pub use classifier::{Classifier, HttpClassifier};
pub use risk::RiskEvaluator;
pub use types::{
    AssessedDetection, BoundingBox, DangerTier, Detection, FrameResult, RiskAssessment,
    DISTANCE_INDETERMINATE,
};
