use super::*;
use crate::error::WildwatchError;
use crate::mock::{ChannelSourceFactory, ScriptedClassifier};
use crate::pipeline::tests::{feed, harness_with, harness_with_sources};
use std::time::Duration;

fn quiet() -> ScriptedClassifier {
    ScriptedClassifier::repeating(Vec::new())
}

#[tokio::test]
async fn test_duplicate_add_is_rejected() {
    let h = harness_with(|_| {}, quiet());

    let state = h.registry.add(5).await.unwrap();
    assert_eq!(state.display_name, "Camera_5");
    assert!(!state.is_active);

    let second = h.registry.add(5).await;
    assert!(matches!(second, Err(RegistryError::AlreadyExists(5))));

    let cameras = h.registry.list().await;
    assert_eq!(cameras.iter().filter(|state| state.id == 5).count(), 1);
}

#[tokio::test]
async fn test_start_unknown_camera_adds_it() {
    let h = harness_with(|_| {}, quiet());

    let state = h.registry.start(3).await.unwrap();
    assert!(state.is_active);
    assert_eq!(state.phase, CameraPhase::Running);
    assert_eq!(h.registry.len().await, 1);

    h.registry.stop(3).await.unwrap();
}

#[tokio::test]
async fn test_start_running_camera_is_noop() {
    let h = harness_with(|_| {}, quiet());

    h.registry.start(1).await.unwrap();
    let feeder = h.sources.feeder(1).unwrap();

    h.registry.start(1).await.unwrap();
    // Same source, so no second device was opened
    assert!(!feeder.is_closed());
    feed(&h, 1, 1).await;

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_stop_idle_and_unknown() {
    let h = harness_with(|_| {}, quiet());

    h.registry.add(2).await.unwrap();
    let state = h.registry.stop(2).await.unwrap();
    assert_eq!(state.phase, CameraPhase::Idle);

    let unknown = h.registry.stop(9).await;
    assert!(matches!(
        unknown,
        Err(WildwatchError::Registry(RegistryError::UnknownCamera(9)))
    ));
    assert!(h.registry.remove(9).await.is_err());
}

#[tokio::test]
async fn test_remove_stops_camera_and_recording() {
    let h = harness_with(|_| {}, quiet());

    h.registry.start(1).await.unwrap();
    h.registry.start_recording(1).await.unwrap();
    assert_eq!(h.writers.open_writers(), 1);

    h.registry.remove(1).await.unwrap();

    assert_eq!(h.writers.open_writers(), 0);
    assert!(h.sources.feeder(1).unwrap().is_closed());
    assert!(h.registry.is_empty().await);
    assert!(h.registry.status(1).await.is_err());
}

#[tokio::test]
async fn test_recording_commands_need_running_camera() {
    let h = harness_with(|_| {}, quiet());
    h.registry.add(1).await.unwrap();

    let result = h.registry.start_recording(1).await;
    assert!(matches!(
        result,
        Err(WildwatchError::Registry(RegistryError::CameraNotActive(1)))
    ));
    assert!(h.registry.stop_recording(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_recording_start_is_rejected() {
    let h = harness_with(|_| {}, quiet());
    h.registry.start(1).await.unwrap();

    let first = h.registry.start_recording(1).await.unwrap();
    let second = h.registry.start_recording(1).await;
    assert!(matches!(second, Err(WildwatchError::Recorder(_))));
    assert_eq!(h.writers.open_writers(), 1);

    let state = h.registry.status(1).await.unwrap();
    assert!(state.is_recording);
    assert_eq!(state.recording_path, Some(first.path));

    assert!(h.registry.stop_recording(1).await.unwrap().is_some());
    assert!(h.registry.stop_recording(1).await.unwrap().is_none());

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_recording() {
    let h = harness_with(|_| {}, quiet());
    h.registry.start(1).await.unwrap();
    h.registry.start_recording(1).await.unwrap();

    let state = h.registry.stop(1).await.unwrap();
    assert!(!state.is_recording);
    assert!(!state.is_active);
    assert_eq!(h.writers.open_writers(), 0);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = harness_with(|_| {}, quiet());

    h.registry.start(1).await.unwrap();
    feed(&h, 1, 2).await;
    h.registry.stop(1).await.unwrap();

    let state = h.registry.start(1).await.unwrap();
    assert!(state.is_active);
    assert_eq!(state.frames_processed, 0);
    feed(&h, 1, 1).await;

    h.registry.stop(1).await.unwrap();
}

#[tokio::test]
async fn test_crashed_worker_reported_idle() {
    let h = harness_with(|_| {}, ScriptedClassifier::panicking("model crashed"));

    h.registry.start(7).await.unwrap();
    let mut status = h.registry.watch_status(7).await.unwrap();
    h.sources
        .feeder(7)
        .unwrap()
        .push(crate::camera::SyntheticFrameSource::synthetic_jpeg(1));

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.phase == CameraPhase::Idle),
    )
    .await
    .unwrap()
    .unwrap();

    let listed = h.registry.list().await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].is_active);
    assert!(!listed[0].live);

    // A later start replaces the dead worker
    let restarted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = h.registry.start(7).await.unwrap();
            if state.is_active {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(restarted.phase, CameraPhase::Running);

    h.registry.stop(7).await.unwrap();
}

#[tokio::test]
async fn test_open_failure_leaves_camera_idle() {
    let h = harness_with_sources(|_| {}, quiet(), ChannelSourceFactory::unavailable([6]));

    let result = h.registry.start(6).await;
    assert!(matches!(result, Err(WildwatchError::Camera(_))));

    let state = h.registry.status(6).await.unwrap();
    assert_eq!(state.phase, CameraPhase::Idle);
    assert!(!state.is_active);
}

#[tokio::test]
async fn test_concurrent_starts_spawn_one_worker() {
    let h = Arc::new(harness_with(|_| {}, quiet()));

    let starts: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.registry.start(1).await.map(|state| state.is_active) })
        })
        .collect();

    for start in starts {
        assert!(start.await.unwrap().unwrap());
    }
    assert_eq!(h.registry.len().await, 1);

    h.registry.shutdown().await;
    assert!(!h.registry.status(1).await.unwrap().is_active);
}
