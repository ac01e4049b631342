use crate::registry::CameraId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WildwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl WildwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera {camera_id}: {details}")]
    DeviceOpen { camera_id: CameraId, details: String },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Classifier returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid image: {details}")]
    InvalidImage { details: String },

    #[error("Inference failed: {details}")]
    Inference { details: String },
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Camera {camera} is already recording to {path}")]
    AlreadyRecording { camera: String, path: String },

    #[error("No codec could open a writer for camera {camera} (tried: {tried})")]
    NoCodecAvailable { camera: String, tried: String },

    #[error("Codec {codec} is not supported by this writer")]
    UnsupportedCodec { codec: String },

    #[error("Writer error: {details}")]
    Writer { details: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Camera {0} already exists")]
    AlreadyExists(CameraId),

    #[error("Camera {0} is not registered")]
    UnknownCamera(CameraId),

    #[error("Camera {0} is not active")]
    CameraNotActive(CameraId),

    #[error("Camera {camera_id} worker did not respond: {details}")]
    WorkerUnavailable { camera_id: CameraId, details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, WildwatchError>;
