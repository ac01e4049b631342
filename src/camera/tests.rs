use super::*;
use crate::config::{CameraEntryConfig, WildwatchConfig};
use std::time::Duration;

fn test_format() -> SourceFormat {
    SourceFormat {
        width: 320,
        height: 240,
        fps: 50,
    }
}

#[test]
fn test_spec_defaults_for_unlisted_camera() {
    let config = WildwatchConfig::default();
    let spec = CameraSpec::resolve(&config, 2);

    assert_eq!(spec.display_name, "Camera_2");
    assert_eq!(spec.source, "/dev/video2");
    assert_eq!(spec.format(), SourceFormat { width: 640, height: 480, fps: 20 });
}

#[test]
fn test_spec_uses_camera_entry() {
    let mut config = WildwatchConfig::default();
    config.cameras.push(CameraEntryConfig {
        id: 7,
        name: Some("Gate".to_string()),
        source: Some("rtsp://10.0.0.7/live".to_string()),
        autostart: true,
    });

    let spec = CameraSpec::resolve(&config, 7);
    assert_eq!(spec.display_name, "Gate_7");
    assert_eq!(spec.source, "rtsp://10.0.0.7/live");
}

#[tokio::test]
async fn test_channel_source_delivers_newest_frame() {
    let (mut source, feeder) = ChannelFrameSource::new("test", test_format());
    source.open().await.unwrap();

    feeder.push(vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    feeder.push(vec![0xFF, 0xD8, 0x02, 0xFF, 0xD9]);

    let frame = source.next_frame(Duration::from_millis(100)).await.unwrap();
    assert_eq!(frame.id, 1);
    assert_eq!((frame.width, frame.height), (320, 240));

    let stats = source.stats();
    assert_eq!(stats.frames_pushed, 2);
    assert_eq!(stats.frames_dropped, 1);
}

#[tokio::test]
async fn test_channel_source_times_out_without_frames() {
    let (mut source, _feeder) = ChannelFrameSource::new("idle", test_format());
    source.open().await.unwrap();

    assert!(source.next_frame(Duration::from_millis(20)).await.is_none());
}

#[tokio::test]
async fn test_channel_source_close_is_visible_to_feeder() {
    let (mut source, feeder) = ChannelFrameSource::new("closing", test_format());
    source.open().await.unwrap();
    source.close().await;

    assert!(feeder.is_closed());
    assert!(source.open().await.is_err());
}

#[tokio::test]
async fn test_synthetic_source_produces_jpeg_frames() {
    let mut source = SyntheticFrameSource::new(test_format());
    source.open().await.unwrap();

    let frame = source.next_frame(Duration::from_secs(1)).await.unwrap();
    assert!(frame.is_complete_jpeg());

    source.close().await;
    assert!(source.frame_count() >= 1);
}

#[tokio::test]
async fn test_factory_builds_synthetic_source() {
    let spec = CameraSpec {
        id: 1,
        display_name: "Camera_1".to_string(),
        source: SYNTHETIC_SOURCE.to_string(),
        width: 320,
        height: 240,
        fps: 10,
    };

    let source = DefaultFrameSourceFactory.create(&spec).unwrap();
    assert_eq!(source.describe(), "synthetic");
    assert_eq!(source.format().fps, 10);
}

#[test]
fn test_frame_interval_never_zero() {
    let mut format = test_format();
    format.fps = 20;
    assert_eq!(format.frame_interval(), Duration::from_millis(50));

    format.fps = 5000;
    assert!(format.frame_interval() > Duration::ZERO);

    format.fps = 0;
    assert_eq!(format.frame_interval(), Duration::from_secs(1));
}
