use crate::detection::DangerTier;
use crate::recorder::CodecCandidate;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Highest capture rate accepted from configuration
pub const MAX_CAMERA_FPS: u32 = 240;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WildwatchConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub cameras: Vec<CameraEntryConfig>,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub contacts: ContactsConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

/// Defaults shared by every camera
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// How long the worker waits for a frame before retrying
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// A camera with no frames for this long is reported as not live
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,

    /// Display name prefix; cameras are named `<name>_<id>`
    #[serde(default = "default_camera_name")]
    pub name: String,
}

/// One configured camera
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraEntryConfig {
    pub id: u32,

    /// Display name prefix (defaults to `camera.name`)
    pub name: Option<String>,

    /// Device path, stream URI or "synthetic". Defaults to /dev/video<id>.
    pub source: Option<String>,

    /// Start this camera when the service starts
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RiskConfig {
    #[serde(default = "default_dangerous")]
    pub dangerous: Vec<String>,

    #[serde(default = "default_moderate")]
    pub moderate: Vec<String>,

    #[serde(default = "default_low_risk")]
    pub low_risk: Vec<String>,

    #[serde(default = "default_human")]
    pub human: Vec<String>,

    /// Assumed real-world width of a detected object in centimetres
    #[serde(default = "default_assumed_object_width_cm")]
    pub assumed_object_width_cm: f64,

    /// Calibrated focal length in pixels
    #[serde(default = "default_focal_length_px")]
    pub focal_length_px: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    /// Minimum seconds between two alerts of the same category
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Length of the danger counting bucket in seconds
    #[serde(default = "default_burst_window_seconds")]
    pub burst_window_seconds: u64,

    /// High-tier frames per bucket required before a danger alert may fire
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: u32,

    /// Humans at or closer than this distance trigger a proximity alert
    #[serde(default = "default_proximity_cm")]
    pub proximity_cm: u32,

    /// Medium-tier detections in (lower, upper] centimetres trigger a lesser alert
    #[serde(default = "default_medium_band_cm")]
    pub medium_band_cm: (u32, u32),

    /// Timezone used for timestamps inside alert messages
    #[serde(default = "default_alert_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ContactsConfig {
    /// Owner-side phone numbers
    #[serde(default)]
    pub owner_numbers: Vec<String>,

    /// Owner-side email addresses
    #[serde(default)]
    pub owner_emails: Vec<String>,

    /// Authority-side phone numbers
    #[serde(default)]
    pub authority_numbers: Vec<String>,

    /// Authority-side email addresses
    #[serde(default)]
    pub authority_emails: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifierConfig {
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_number: Option<String>,

    /// Base URL of the Twilio REST API
    #[serde(default = "default_twilio_api_url")]
    pub twilio_api_url: String,

    /// HTTP mail relay endpoint accepting JSON messages
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub sender_email: Option<String>,

    /// Per-request timeout for notification transports
    #[serde(default = "default_notifier_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    /// Base URL of the detection service
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,

    /// Detections below this confidence are discarded
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_classifier_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Directory receiving recording files
    #[serde(default = "default_recording_path")]
    pub path: String,

    /// Codec candidates in preference order
    #[serde(default = "default_codecs")]
    pub codecs: Vec<String>,

    /// Start recording automatically when a frame reaches this tier
    pub auto_record_tier: Option<String>,

    /// Seconds without a qualifying frame before an automatic recording stops
    #[serde(default = "default_postroll_seconds")]
    pub postroll_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory for the detection and alert logs
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Entries kept in memory for history queries
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Days of detections and alerts kept on disk; 0 keeps everything
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Seconds to wait for a camera worker to acknowledge a stop
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
}

impl WildwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("wildwatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.frame_timeout_ms", default_frame_timeout_ms())?
            .set_default("camera.stale_after_seconds", default_stale_after_seconds())?
            .set_default("camera.name", default_camera_name())?
            .set_default("alerts.cooldown_seconds", default_cooldown_seconds())?
            .set_default("alerts.burst_window_seconds", default_burst_window_seconds())?
            .set_default("alerts.burst_threshold", default_burst_threshold())?
            .set_default("alerts.proximity_cm", default_proximity_cm())?
            .set_default(
                "alerts.medium_band_cm",
                vec![default_medium_band_cm().0, default_medium_band_cm().1],
            )?
            .set_default("alerts.timezone", default_alert_timezone())?
            .set_default("classifier.endpoint", default_classifier_endpoint())?
            .set_default(
                "classifier.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default("classifier.timeout_ms", default_classifier_timeout_ms())?
            .set_default("recording.path", default_recording_path())?
            .set_default("recording.codecs", default_codecs())?
            .set_default("recording.postroll_seconds", default_postroll_seconds())?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.max_history", default_max_history() as i64)?
            .set_default("storage.retention_days", default_retention_days())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.stop_timeout_seconds", default_stop_timeout_seconds())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // WILDWATCH_CONTACTS__OWNER_NUMBERS="+1555...,+1555..."
            .add_source(
                Environment::with_prefix("WILDWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("contacts.owner_numbers")
                    .with_list_parse_key("contacts.owner_emails")
                    .with_list_parse_key("contacts.authority_numbers")
                    .with_list_parse_key("contacts.authority_emails")
                    .with_list_parse_key("recording.codecs")
                    .try_parsing(true),
            )
            .build()?;

        let config: WildwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 || self.camera.fps > MAX_CAMERA_FPS {
            return Err(ConfigError::Message(format!(
                "Camera fps must be between 1 and {}",
                MAX_CAMERA_FPS
            )));
        }

        if self.camera.frame_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera frame_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for entry in &self.cameras {
            if !seen_ids.insert(entry.id) {
                return Err(ConfigError::Message(format!(
                    "Camera {} is configured more than once",
                    entry.id
                )));
            }
        }

        if self.risk.assumed_object_width_cm <= 0.0 || self.risk.focal_length_px <= 0.0 {
            return Err(ConfigError::Message(
                "Risk calibration values must be greater than 0".to_string(),
            ));
        }

        self.validate_word_lists()?;

        if self.alerts.burst_threshold == 0 {
            return Err(ConfigError::Message(
                "Alert burst_threshold must be greater than 0".to_string(),
            ));
        }

        if self.alerts.burst_window_seconds == 0 {
            return Err(ConfigError::Message(
                "Alert burst_window_seconds must be greater than 0".to_string(),
            ));
        }

        if self.alerts.medium_band_cm.0 >= self.alerts.medium_band_cm.1 {
            return Err(ConfigError::Message(format!(
                "Alert medium_band_cm lower bound {} must be below upper bound {}",
                self.alerts.medium_band_cm.0, self.alerts.medium_band_cm.1
            )));
        }

        if !(0.0..=1.0).contains(&self.classifier.confidence_threshold) {
            return Err(ConfigError::Message(
                "Classifier confidence_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.recording.codecs.is_empty() {
            return Err(ConfigError::Message(
                "Recording codecs must not be empty".to_string(),
            ));
        }

        for codec in &self.recording.codecs {
            if CodecCandidate::from_name(codec).is_none() {
                return Err(ConfigError::Message(format!(
                    "Unknown recording codec '{}'",
                    codec
                )));
            }
        }

        if let Some(tier) = &self.recording.auto_record_tier {
            if DangerTier::from_name(tier).is_none() {
                return Err(ConfigError::Message(format!(
                    "Unknown auto_record_tier '{}'",
                    tier
                )));
            }
        }

        if self.storage.max_history == 0 {
            return Err(ConfigError::Message(
                "Storage max_history must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The four tier word-lists must not share a word
    fn validate_word_lists(&self) -> Result<(), ConfigError> {
        let lists = [
            ("dangerous", &self.risk.dangerous),
            ("moderate", &self.risk.moderate),
            ("low_risk", &self.risk.low_risk),
            ("human", &self.risk.human),
        ];

        let mut owners: HashMap<String, &str> = HashMap::new();
        for (list_name, words) in lists {
            for word in words {
                let word = word.trim().to_lowercase();
                if word.is_empty() {
                    return Err(ConfigError::Message(format!(
                        "Risk list '{}' contains an empty word",
                        list_name
                    )));
                }
                if let Some(other) = owners.insert(word.clone(), list_name) {
                    if other != list_name {
                        return Err(ConfigError::Message(format!(
                            "Word '{}' appears in both '{}' and '{}'",
                            word, other, list_name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolve the configured entry for a camera, if any
    pub fn camera_entry(&self, id: u32) -> Option<&CameraEntryConfig> {
        self.cameras.iter().find(|entry| entry.id == id)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            frame_timeout_ms: default_frame_timeout_ms(),
            stale_after_seconds: default_stale_after_seconds(),
            name: default_camera_name(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            dangerous: default_dangerous(),
            moderate: default_moderate(),
            low_risk: default_low_risk(),
            human: default_human(),
            assumed_object_width_cm: default_assumed_object_width_cm(),
            focal_length_px: default_focal_length_px(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            burst_window_seconds: default_burst_window_seconds(),
            burst_threshold: default_burst_threshold(),
            proximity_cm: default_proximity_cm(),
            medium_band_cm: default_medium_band_cm(),
            timezone: default_alert_timezone(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_number: None,
            twilio_api_url: default_twilio_api_url(),
            mail_api_url: None,
            mail_api_key: None,
            sender_email: None,
            timeout_seconds: default_notifier_timeout_seconds(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_classifier_endpoint(),
            confidence_threshold: default_confidence_threshold(),
            timeout_ms: default_classifier_timeout_ms(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            path: default_recording_path(),
            codecs: default_codecs(),
            auto_record_tier: None,
            postroll_seconds: default_postroll_seconds(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_history: default_max_history(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            stop_timeout_seconds: default_stop_timeout_seconds(),
        }
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|word| word.to_string()).collect()
}

// Default value functions
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    20
}
fn default_frame_timeout_ms() -> u64 {
    500
}
fn default_stale_after_seconds() -> u64 {
    5
}
fn default_camera_name() -> String {
    "Camera".to_string()
}
fn default_autostart() -> bool {
    true
}

fn default_dangerous() -> Vec<String> {
    words(&[
        "tiger", "lion", "leopard", "bear", "wolf", "hyena", "crocodile", "elephant", "rhino",
        "buffalo",
    ])
}
fn default_moderate() -> Vec<String> {
    words(&["deer", "wild boar", "monkey", "fox", "jackal", "wild dog"])
}
fn default_low_risk() -> Vec<String> {
    words(&["rabbit", "squirrel", "peacock", "bird", "domestic animal"])
}
fn default_human() -> Vec<String> {
    words(&["person", "human", "man", "woman", "child"])
}
fn default_assumed_object_width_cm() -> f64 {
    60.0
}
fn default_focal_length_px() -> f64 {
    700.0
}

fn default_cooldown_seconds() -> u64 {
    60
}
fn default_burst_window_seconds() -> u64 {
    10
}
fn default_burst_threshold() -> u32 {
    15
}
fn default_proximity_cm() -> u32 {
    30
}
fn default_medium_band_cm() -> (u32, u32) {
    (30, 50)
}
fn default_alert_timezone() -> String {
    "UTC".to_string()
}

fn default_twilio_api_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_notifier_timeout_seconds() -> u64 {
    10
}

fn default_classifier_endpoint() -> String {
    "http://127.0.0.1:8001".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_classifier_timeout_ms() -> u64 {
    2000
}

fn default_recording_path() -> String {
    "./recordings".to_string()
}
fn default_codecs() -> Vec<String> {
    CodecCandidate::DEFAULT_PREFERENCE
        .iter()
        .map(|codec| codec.name().to_string())
        .collect()
}
fn default_postroll_seconds() -> u64 {
    10
}

fn default_storage_path() -> String {
    "./data".to_string()
}
fn default_max_history() -> usize {
    1000
}
fn default_retention_days() -> u32 {
    30
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_stop_timeout_seconds() -> u64 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WildwatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alerts.cooldown_seconds, 60);
        assert_eq!(config.alerts.burst_threshold, 15);
        assert_eq!(config.alerts.burst_window_seconds, 10);
        assert_eq!(config.recording.codecs[0], "vp8");
    }

    #[test]
    fn test_config_validation() {
        let mut config = WildwatchConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.alerts.medium_band_cm = (50, 30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fps_range_validated() {
        let mut config = WildwatchConfig::default();
        config.camera.fps = MAX_CAMERA_FPS;
        assert!(config.validate().is_ok());

        config.camera.fps = 5000;
        assert!(config.validate().is_err());

        config.camera.fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_word_lists_rejected() {
        let mut config = WildwatchConfig::default();
        config.risk.moderate.push("Tiger".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tiger"));
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let mut config = WildwatchConfig::default();
        config.recording.codecs = vec!["vp8".to_string(), "theora".to_string()];
        assert!(config.validate().is_err());

        config.recording.codecs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_camera_rejected() {
        let mut config = WildwatchConfig::default();
        let entry = CameraEntryConfig {
            id: 3,
            name: None,
            source: None,
            autostart: true,
        };
        config.cameras = vec![entry.clone(), entry];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[alerts]
cooldown_seconds = 120
burst_threshold = 5

[contacts]
owner_numbers = ["+15550001"]

[[cameras]]
id = 2
name = "Gate"
source = "synthetic"
"#
        )
        .unwrap();

        let config = WildwatchConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.alerts.cooldown_seconds, 120);
        assert_eq!(config.alerts.burst_threshold, 5);
        assert_eq!(config.alerts.burst_window_seconds, 10);
        assert_eq!(config.contacts.owner_numbers, vec!["+15550001".to_string()]);

        let camera = config.camera_entry(2).unwrap();
        assert_eq!(camera.name.as_deref(), Some("Gate"));
        assert!(camera.autostart);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&WildwatchConfig::default()).unwrap();
        assert!(rendered.contains("cooldown_seconds = 60"));
    }
}
