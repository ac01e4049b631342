pub mod alert;
pub mod app;
pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod events;
pub mod frame;
pub mod frame_slot;
pub mod mock;
pub mod pipeline;
pub mod recorder;
pub mod registry;
pub mod storage;

pub use alert::{
    AlertCategory, AlertDispatcher, AlertEvent, AlertThrottle, DeliveryStatus, HttpNotifier,
    LogNotifier, Notifier,
};
pub use app::{RecordingFile, ShutdownReason, WildwatchService, WildwatchServiceBuilder};
pub use camera::{CameraSpec, FrameSource, FrameSourceFactory};
pub use config::WildwatchConfig;
pub use detection::{
    AssessedDetection, Classifier, DangerTier, Detection, FrameResult, HttpClassifier,
    RiskAssessment, RiskEvaluator,
};
pub use error::{Result, WildwatchError};
pub use events::{EventBus, EventFilter, EventReceiver, WildwatchEvent};
pub use frame::{FrameData, FrameFormat};
pub use frame_slot::FrameSlot;
pub use recorder::{CodecCandidate, Recorder, RecordingInfo, RecordingSummary};
pub use registry::{CameraId, CameraPhase, CameraRegistry, CameraState};
pub use storage::{EventStore, JsonlEventStore, MemoryEventStore};
