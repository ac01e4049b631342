//! Test doubles for the classifier, notifier, camera and recording seams, for
//! exercising the pipeline without a detection service, SMS/email transport
//! or GStreamer.

use crate::camera::{
    CameraSpec, ChannelFrameSource, FrameFeeder, FrameSource, FrameSourceFactory,
};
use crate::detection::{Classifier, Detection};
use crate::error::{CameraError, ClassifierError, RecorderError};
use crate::frame::FrameData;
use crate::recorder::{CodecCandidate, VideoWriter, VideoWriterFactory, WriterSpec};
use crate::registry::CameraId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Script {
    Repeat(Vec<Detection>),
    Sequence(VecDeque<Result<Vec<Detection>, String>>),
    Fail(String),
    Panic(String),
}

/// Classifier returning canned detections
pub struct ScriptedClassifier {
    script: Mutex<Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    /// Same detections for every frame
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::with_script(Script::Repeat(detections))
    }

    /// One entry per frame; once exhausted every frame is empty
    pub fn sequence(results: Vec<Result<Vec<Detection>, String>>) -> Self {
        Self::with_script(Script::Sequence(results.into()))
    }

    /// Every call fails
    pub fn failing(details: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(details.into()))
    }

    /// Every call panics, to simulate a crashing worker
    pub fn panicking(message: impl Into<String>) -> Self {
        Self::with_script(Script::Panic(message.into()))
    }

    /// Sleep before answering, to simulate a slow model
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Result<Vec<Detection>, ClassifierError> {
        let mut script = self.script.lock();
        let outcome = match &mut *script {
            Script::Repeat(detections) => Ok(detections.clone()),
            Script::Sequence(queue) => queue.pop_front().unwrap_or_else(|| Ok(Vec::new())),
            Script::Fail(details) => Err(details.clone()),
            Script::Panic(message) => panic!("{}", message),
        };
        outcome.map_err(|details| ClassifierError::Inference { details })
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn detect(&self, _frame: &FrameData) -> Result<Vec<Detection>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// One message captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Sms { number: String, text: String },
    Email { address: String, subject: String },
}

impl SentMessage {
    pub fn recipient(&self) -> &str {
        match self {
            SentMessage::Sms { number, .. } => number,
            SentMessage::Email { address, .. } => address,
        }
    }
}

/// Notifier that remembers every message instead of sending it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to these recipients report failure
    pub fn failing_for<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: recipients.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|message| message.recipient().to_string())
            .collect()
    }
}

#[async_trait]
impl crate::alert::Notifier for RecordingNotifier {
    async fn send_sms(&self, number: &str, text: &str) -> bool {
        self.sent.lock().push(SentMessage::Sms {
            number: number.to_string(),
            text: text.to_string(),
        });
        !self.failing.contains(number)
    }

    async fn send_email(&self, address: &str, subject: &str, _body: &str) -> bool {
        self.sent.lock().push(SentMessage::Email {
            address: address.to_string(),
            subject: subject.to_string(),
        });
        !self.failing.contains(address)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[derive(Debug, Default)]
struct WriterCounters {
    open: AtomicUsize,
    opened: AtomicUsize,
    frames: AtomicUsize,
}

/// Writer factory that keeps nothing on disk. Only the listed codecs open;
/// the rest fail like a missing encoder would.
#[derive(Clone)]
pub struct MemoryWriterFactory {
    available: HashSet<CodecCandidate>,
    fail_after: Option<usize>,
    counters: Arc<WriterCounters>,
    specs: Arc<Mutex<Vec<WriterSpec>>>,
}

impl MemoryWriterFactory {
    pub fn new(available: &[CodecCandidate]) -> Self {
        Self {
            available: available.iter().copied().collect(),
            fail_after: None,
            counters: Arc::new(WriterCounters::default()),
            specs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every codec opens
    pub fn all() -> Self {
        Self::new(&CodecCandidate::DEFAULT_PREFERENCE)
    }

    /// Writers fail on the frame after `frames` successful writes
    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Writers currently open
    pub fn open_writers(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Writers opened over the factory's lifetime
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn frames_written(&self) -> usize {
        self.counters.frames.load(Ordering::SeqCst)
    }

    pub fn opened_specs(&self) -> Vec<WriterSpec> {
        self.specs.lock().clone()
    }
}

impl VideoWriterFactory for MemoryWriterFactory {
    fn open(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>, RecorderError> {
        if !self.available.contains(&spec.codec) {
            return Err(RecorderError::UnsupportedCodec {
                codec: spec.codec.name().to_string(),
            });
        }

        self.counters.open.fetch_add(1, Ordering::SeqCst);
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().push(spec.clone());

        Ok(Box::new(MemoryWriter {
            counters: Arc::clone(&self.counters),
            fail_after: self.fail_after,
            written: 0,
            closed: false,
        }))
    }
}

struct MemoryWriter {
    counters: Arc<WriterCounters>,
    fail_after: Option<usize>,
    written: usize,
    closed: bool,
}

impl VideoWriter for MemoryWriter {
    fn write_frame(&mut self, _frame: &FrameData) -> Result<(), RecorderError> {
        if self.closed {
            return Err(RecorderError::Writer {
                details: "write after close".to_string(),
            });
        }
        if self.fail_after.is_some_and(|limit| self.written >= limit) {
            return Err(RecorderError::Writer {
                details: "simulated disk failure".to_string(),
            });
        }

        self.written += 1;
        self.counters.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Hands every started camera a [`ChannelFrameSource`] and keeps its feeder
#[derive(Default)]
pub struct ChannelSourceFactory {
    feeders: Mutex<HashMap<CameraId, FrameFeeder>>,
    unavailable: HashSet<CameraId>,
}

impl ChannelSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening these cameras fails like a missing device
    pub fn unavailable<I: IntoIterator<Item = CameraId>>(ids: I) -> Self {
        Self {
            feeders: Mutex::new(HashMap::new()),
            unavailable: ids.into_iter().collect(),
        }
    }

    /// Feeder of the camera's most recently created source
    pub fn feeder(&self, id: CameraId) -> Option<FrameFeeder> {
        self.feeders.lock().get(&id).cloned()
    }
}

impl FrameSourceFactory for ChannelSourceFactory {
    fn create(&self, spec: &CameraSpec) -> Result<Box<dyn FrameSource>, CameraError> {
        if self.unavailable.contains(&spec.id) {
            return Err(CameraError::DeviceOpen {
                camera_id: spec.id,
                details: format!("{} not present", spec.source),
            });
        }

        let (source, feeder) = ChannelFrameSource::new(spec.display_name.clone(), spec.format());
        self.feeders.lock().insert(spec.id, feeder);
        Ok(Box::new(source))
    }
}
