use super::*;
use crate::alert::{AlertCategory, AlertDispatcher, AlertRequest, AlertThrottle};
use crate::camera::SyntheticFrameSource;
use crate::config::{ContactsConfig, WildwatchConfig};
use crate::detection::{BoundingBox, DangerTier, Detection};
use crate::events::{EventBus, EventFilter, WildwatchEvent};
use crate::mock::{ChannelSourceFactory, MemoryWriterFactory, RecordingNotifier, ScriptedClassifier};
use crate::registry::{CameraId, CameraRegistry};
use crate::storage::{EventStore, MemoryEventStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub(crate) struct Harness {
    pub registry: CameraRegistry,
    pub sources: Arc<ChannelSourceFactory>,
    pub classifier: Arc<ScriptedClassifier>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryEventStore>,
    pub bus: Arc<EventBus>,
    pub writers: MemoryWriterFactory,
    _dir: TempDir,
}

pub(crate) fn test_config(dir: &TempDir) -> WildwatchConfig {
    let mut config = WildwatchConfig::default();
    config.camera.frame_timeout_ms = 50;
    config.camera.stale_after_seconds = 60;
    config.recording.path = dir.path().join("recordings").display().to_string();
    config.contacts = ContactsConfig {
        owner_numbers: vec!["+1000".to_string()],
        owner_emails: vec!["owner@farm.local".to_string()],
        authority_numbers: vec!["+9000".to_string()],
        authority_emails: vec!["ranger@forest.gov".to_string()],
    };
    config
}

pub(crate) fn harness_with(
    configure: impl FnOnce(&mut WildwatchConfig),
    classifier: ScriptedClassifier,
) -> Harness {
    harness_with_sources(configure, classifier, ChannelSourceFactory::new())
}

pub(crate) fn harness_with_sources(
    configure: impl FnOnce(&mut WildwatchConfig),
    classifier: ScriptedClassifier,
    sources: ChannelSourceFactory,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    configure(&mut config);

    let classifier = Arc::new(classifier);
    let notifier = Arc::new(RecordingNotifier::new());
    let store = Arc::new(MemoryEventStore::default());
    let bus = Arc::new(EventBus::new(256));
    let writers = MemoryWriterFactory::all();
    let sources = Arc::new(sources);

    let dispatcher = Arc::new(AlertDispatcher::new(
        &config.alerts,
        config.contacts.clone(),
        Arc::new(AlertThrottle::new(Duration::from_secs(
            config.alerts.cooldown_seconds,
        ))),
        notifier.clone(),
        store.clone(),
        bus.clone(),
    ));

    let context = PipelineContext::new(
        &config,
        classifier.clone(),
        dispatcher,
        store.clone(),
        bus.clone(),
        Arc::new(writers.clone()),
    )
    .unwrap();

    let registry = CameraRegistry::new(Arc::new(config), Arc::new(context), sources.clone());

    Harness {
        registry,
        sources,
        classifier,
        notifier,
        store,
        bus,
        writers,
        _dir: dir,
    }
}

/// Push `frames` frames one at a time, waiting for each to be processed
pub(crate) async fn feed(h: &Harness, id: CameraId, frames: u64) {
    let feeder = h.sources.feeder(id).unwrap();
    let mut status = h.registry.watch_status(id).await.unwrap();
    let start = status.borrow().frames_processed;

    for i in 1..=frames {
        feeder.push(SyntheticFrameSource::synthetic_jpeg(i));
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.frames_processed >= start + i),
        )
        .await
        .unwrap()
        .unwrap();
    }
}

fn detection(label: &str, width: f32, height: f32, confidence: f32) -> Detection {
    Detection::new(BoundingBox::new(10.0, 10.0, 10.0 + width, 10.0 + height), label, confidence)
}

async fn alerts_of(h: &Harness, category: AlertCategory) -> usize {
    h.store
        .list_recent_alerts(100)
        .await
        .iter()
        .filter(|alert| alert.category == category)
        .count()
}

#[tokio::test]
async fn test_tiger_burst_fires_single_danger_alert() {
    let h = harness_with(
        |_| {},
        ScriptedClassifier::repeating(vec![detection("Tiger", 50.0, 40.0, 0.9)]),
    );
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 20).await;
    assert_eq!(alerts_of(&h, AlertCategory::DangerHigh).await, 1);

    let recipients = h.notifier.recipients();
    assert!(recipients.contains(&"+1000".to_string()));
    assert!(recipients.contains(&"+9000".to_string()));

    // Second burst inside the cooldown
    feed(&h, 1, 20).await;
    assert_eq!(alerts_of(&h, AlertCategory::DangerHigh).await, 1);
    assert_eq!(h.store.list_recent_alerts(100).await.len(), 1);

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_tiger_below_burst_threshold_is_quiet() {
    let h = harness_with(
        |_| {},
        ScriptedClassifier::repeating(vec![detection("tiger", 50.0, 40.0, 0.9)]),
    );
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 14).await;
    assert_eq!(alerts_of(&h, AlertCategory::DangerHigh).await, 0);

    feed(&h, 1, 1).await;
    assert_eq!(alerts_of(&h, AlertCategory::DangerHigh).await, 1);

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_near_person_alerts_owner_only() {
    // 60 cm * 700 px / 2000 px = 21 cm
    let h = harness_with(
        |_| {},
        ScriptedClassifier::sequence(vec![Ok(vec![detection("person", 2000.0, 1500.0, 0.8)])]),
    );
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 3).await;

    let alerts = h.store.list_recent_alerts(10).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].category, AlertCategory::Proximity);
    assert_eq!(h.notifier.recipients(), vec!["+1000".to_string()]);

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_indeterminate_distance_never_alerts() {
    let h = harness_with(
        |_| {},
        ScriptedClassifier::repeating(vec![
            detection("person", 0.0, 300.0, 0.8),
            detection("deer", 0.0, 300.0, 0.8),
        ]),
    );
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 3).await;

    assert!(h.store.list_recent_alerts(10).await.is_empty());
    let records = h.store.recent_detections(Some(1), 10).await;
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|record| record.distance_cm == 0));

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_medium_animal_in_band_alerts_owner() {
    // 42000 / 1050 = 40 cm, inside (30, 50]
    let h = harness_with(
        |_| {},
        ScriptedClassifier::repeating(vec![detection("wild boar", 1050.0, 600.0, 0.7)]),
    );
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 2).await;

    assert_eq!(alerts_of(&h, AlertCategory::MediumDanger).await, 1);
    assert_eq!(h.notifier.recipients(), vec!["+1000".to_string()]);

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_classifier_failure_treats_frame_as_empty() {
    let h = harness_with(
        |_| {},
        ScriptedClassifier::sequence(vec![
            Err("model crashed".to_string()),
            Ok(vec![detection("fox", 100.0, 80.0, 0.9)]),
        ]),
    );
    let mut analyzed = h
        .bus
        .subscribe_filtered(EventFilter::EventTypes(vec!["frame_analyzed"]), "test");
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 2).await;

    match analyzed.recv().await.unwrap() {
        WildwatchEvent::FrameAnalyzed {
            detection_count,
            max_tier,
            ..
        } => {
            assert_eq!(detection_count, 0);
            assert_eq!(max_tier, DangerTier::None);
        }
        other => panic!("unexpected event: {}", other.description()),
    }
    match analyzed.recv().await.unwrap() {
        WildwatchEvent::FrameAnalyzed { max_tier, .. } => assert_eq!(max_tier, DangerTier::Medium),
        other => panic!("unexpected event: {}", other.description()),
    }

    assert_eq!(h.classifier.calls(), 2);
    assert_eq!(h.store.recent_detections(None, 10).await.len(), 1);

    let state = h.registry.status(1).await.unwrap();
    assert_eq!(state.frames_processed, 2);
    assert_eq!(state.last_max_tier, DangerTier::Medium);

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_auto_recording_stops_after_postroll() {
    let h = harness_with(
        |config| {
            config.recording.auto_record_tier = Some("high".to_string());
            config.recording.postroll_seconds = 0;
        },
        ScriptedClassifier::sequence(vec![
            Ok(vec![detection("bear", 300.0, 300.0, 0.9)]),
            Ok(vec![detection("bear", 300.0, 300.0, 0.9)]),
            Ok(Vec::new()),
        ]),
    );
    let mut recordings = h.bus.subscribe_filtered(
        EventFilter::EventTypes(vec!["recording_started", "recording_stopped"]),
        "test",
    );
    h.registry.start(1).await.unwrap();

    feed(&h, 1, 2).await;
    assert!(h.registry.status(1).await.unwrap().is_recording);

    feed(&h, 1, 1).await;
    let state = h.registry.status(1).await.unwrap();
    assert!(!state.is_recording);
    assert!(state.recording_path.is_none());

    assert_eq!(h.writers.opened(), 1);
    assert_eq!(h.writers.open_writers(), 0);
    // Both qualifying frames were written
    assert_eq!(h.writers.frames_written(), 2);

    match recordings.recv().await.unwrap() {
        WildwatchEvent::RecordingStarted { automatic, .. } => assert!(automatic),
        other => panic!("unexpected event: {}", other.description()),
    }
    match recordings.recv().await.unwrap() {
        WildwatchEvent::RecordingStopped { frames_written, .. } => assert_eq!(frames_written, 2),
        other => panic!("unexpected event: {}", other.description()),
    }

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_manual_recording_is_not_auto_stopped() {
    let h = harness_with(
        |config| {
            config.recording.auto_record_tier = Some("high".to_string());
            config.recording.postroll_seconds = 0;
        },
        ScriptedClassifier::repeating(Vec::new()),
    );
    h.registry.start(1).await.unwrap();

    let info = h.registry.start_recording(1).await.unwrap();
    assert!(!info.automatic);

    feed(&h, 1, 3).await;
    assert!(h.registry.status(1).await.unwrap().is_recording);

    let summary = h.registry.stop_recording(1).await.unwrap().unwrap();
    assert_eq!(summary.frames_written, 3);
    assert_eq!(summary.path, info.path);

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_stop_discards_in_flight_result() {
    let h = harness_with(
        |_| {},
        ScriptedClassifier::repeating(vec![detection("tiger", 50.0, 40.0, 0.9)])
            .with_delay(Duration::from_millis(300)),
    );
    h.registry.start(1).await.unwrap();

    let feeder = h.sources.feeder(1).unwrap();
    feeder.push(SyntheticFrameSource::synthetic_jpeg(1));
    while h.classifier.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let state = h.registry.stop(1).await.unwrap();
    assert!(!state.is_active);
    assert_eq!(state.frames_processed, 0);
    assert!(h.store.recent_detections(None, 10).await.is_empty());
    assert!(feeder.is_closed());
}

#[tokio::test]
async fn test_lost_feed_raises_system_alert() {
    let h = harness_with(
        |config| config.camera.stale_after_seconds = 1,
        ScriptedClassifier::repeating(Vec::new()),
    );
    h.registry.start(4).await.unwrap();
    let mut status = h.registry.watch_status(4).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| !s.live))
        .await
        .unwrap()
        .unwrap();

    let alerts = h.store.list_recent_alerts(10).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].category, AlertCategory::System);
    assert_eq!(alerts[0].camera_id, Some(4));
    assert!(alerts[0].message.contains("camera feed lost"));

    feed(&h, 4, 1).await;
    assert!(h.registry.status(4).await.unwrap().live);

    h.registry.stop(4).await.unwrap();
}

#[tokio::test]
async fn test_each_lost_feed_alerts_separately() {
    let h = harness_with(
        |config| config.camera.stale_after_seconds = 1,
        ScriptedClassifier::repeating(Vec::new()),
    );
    h.registry.start(4).await.unwrap();
    h.registry.start(5).await.unwrap();

    for id in [4, 5] {
        let mut status = h.registry.watch_status(id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| !s.live))
            .await
            .unwrap()
            .unwrap();
    }

    let mut cameras: Vec<_> = h
        .store
        .list_recent_alerts(10)
        .await
        .iter()
        .map(|alert| alert.camera_id)
        .collect();
    cameras.sort();
    assert_eq!(cameras, vec![Some(4), Some(5)]);

    let stopped = h
        .registry
        .context()
        .dispatcher
        .fire(AlertRequest::system(None, "system stopped"), Instant::now())
        .await;
    assert!(stopped.is_some());

    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_cameras_run_independently() {
    let h = harness_with(
        |_| {},
        ScriptedClassifier::repeating(vec![detection("rabbit", 100.0, 100.0, 0.9)]),
    );
    h.registry.start(1).await.unwrap();
    h.registry.start(2).await.unwrap();

    feed(&h, 1, 3).await;
    feed(&h, 2, 1).await;

    assert_eq!(h.store.recent_detections(Some(1), 10).await.len(), 3);
    assert_eq!(h.store.recent_detections(Some(2), 10).await.len(), 1);

    h.registry.shutdown().await;
    assert!(h.registry.list().await.iter().all(|state| !state.is_active));
}
