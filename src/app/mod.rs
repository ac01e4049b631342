mod runtime;
mod service;
mod shutdown;
mod startup;
mod types;


pub use service::WildwatchService;
pub use startup::WildwatchServiceBuilder;
pub use types::{RecordingFile, ShutdownReason};
