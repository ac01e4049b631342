use crate::alert::AlertEvent;
use crate::detection::DangerTier;
use crate::error::EventBusError;
use crate::registry::CameraId;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Live events published for stream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WildwatchEvent {
    /// A frame went through the classifier
    FrameAnalyzed {
        camera_id: CameraId,
        frame_id: u64,
        detection_count: usize,
        max_tier: DangerTier,
        timestamp: SystemTime,
    },
    /// An alert passed the throttle and was dispatched
    AlertFired { alert: AlertEvent },
    /// Camera activity or liveness changed
    CameraStatusChanged {
        camera_id: CameraId,
        active: bool,
        live: bool,
        timestamp: SystemTime,
    },
    /// A recording session was opened
    RecordingStarted {
        camera_id: CameraId,
        path: String,
        codec: String,
        automatic: bool,
    },
    /// A recording session was closed
    RecordingStopped {
        camera_id: CameraId,
        path: String,
        frames_written: u64,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl WildwatchEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            WildwatchEvent::FrameAnalyzed { timestamp, .. } => *timestamp,
            WildwatchEvent::AlertFired { alert } => alert.fired_at.into(),
            WildwatchEvent::CameraStatusChanged { timestamp, .. } => *timestamp,
            WildwatchEvent::RecordingStarted { .. } => SystemTime::now(),
            WildwatchEvent::RecordingStopped { .. } => SystemTime::now(),
            WildwatchEvent::SystemError { .. } => SystemTime::now(),
            WildwatchEvent::ShutdownRequested { timestamp, .. } => *timestamp,
        }
    }

    /// Camera the event belongs to, if any
    pub fn camera_id(&self) -> Option<CameraId> {
        match self {
            WildwatchEvent::FrameAnalyzed { camera_id, .. }
            | WildwatchEvent::CameraStatusChanged { camera_id, .. }
            | WildwatchEvent::RecordingStarted { camera_id, .. }
            | WildwatchEvent::RecordingStopped { camera_id, .. } => Some(*camera_id),
            WildwatchEvent::AlertFired { alert } => alert.camera_id,
            WildwatchEvent::SystemError { .. } | WildwatchEvent::ShutdownRequested { .. } => None,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            WildwatchEvent::FrameAnalyzed {
                camera_id,
                frame_id,
                detection_count,
                max_tier,
                ..
            } => format!(
                "Camera {} frame {}: {} detections (max tier {})",
                camera_id, frame_id, detection_count, max_tier
            ),
            WildwatchEvent::AlertFired { alert } => {
                format!("{} alert: {}", alert.category, alert.message)
            }
            WildwatchEvent::CameraStatusChanged {
                camera_id,
                active,
                live,
                ..
            } => format!(
                "Camera {} {} ({})",
                camera_id,
                if *active { "active" } else { "inactive" },
                if *live { "live" } else { "no feed" }
            ),
            WildwatchEvent::RecordingStarted {
                camera_id,
                path,
                codec,
                ..
            } => format!("Camera {} recording to {} ({})", camera_id, path, codec),
            WildwatchEvent::RecordingStopped {
                camera_id,
                path,
                frames_written,
            } => format!(
                "Camera {} recording stopped: {} ({} frames)",
                camera_id, path, frames_written
            ),
            WildwatchEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            WildwatchEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            WildwatchEvent::FrameAnalyzed { .. } => "frame_analyzed",
            WildwatchEvent::AlertFired { .. } => "alert_fired",
            WildwatchEvent::CameraStatusChanged { .. } => "camera_status_changed",
            WildwatchEvent::RecordingStarted { .. } => "recording_started",
            WildwatchEvent::RecordingStopped { .. } => "recording_stopped",
            WildwatchEvent::SystemError { .. } => "system_error",
            WildwatchEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<WildwatchEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<WildwatchEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing with nobody listening is not an error; it returns `Ok(0)`.
    pub async fn publish(&self, event: WildwatchEvent) -> Result<usize, EventBusError> {
        match &event {
            WildwatchEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            WildwatchEvent::CameraStatusChanged {
                camera_id, live, ..
            } => {
                if *live {
                    info!("Camera {} feed live", camera_id);
                } else {
                    warn!("Camera {} feed not live", camera_id);
                }
            }
            WildwatchEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => trace!("Event: {}", event.description()),
        }

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events about specific cameras
    Cameras(Vec<CameraId>),
    /// Accept events from specific components (for SystemError events)
    Components(Vec<String>),
    /// Custom filter function
    Custom(fn(&WildwatchEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &WildwatchEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Cameras(cameras) => event
                .camera_id()
                .map(|id| cameras.contains(&id))
                .unwrap_or(false),
            EventFilter::Components(components) => {
                if let WildwatchEvent::SystemError { component, .. } = event {
                    components.contains(component)
                } else {
                    false
                }
            }
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<WildwatchEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<WildwatchEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<WildwatchEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<WildwatchEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
