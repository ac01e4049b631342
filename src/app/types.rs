use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

impl ShutdownReason {
    pub fn describe(&self) -> String {
        match self {
            ShutdownReason::Signal(signal) => format!("signal {}", signal),
            ShutdownReason::Error(error) => format!("error: {}", error),
            ShutdownReason::UserRequest => "user request".to_string(),
        }
    }
}

/// One file in the recordings directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}
