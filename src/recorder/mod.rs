pub mod codec;
pub mod core;

#[cfg(test)]
mod tests;

pub use codec::{
    CodecCandidate, DefaultWriterFactory, MjpegStreamWriter, VideoWriter, VideoWriterFactory,
    WriterSpec,
};
pub use self::core::{Recorder, RecordingInfo, RecordingSession, RecordingSummary};
