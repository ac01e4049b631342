use super::*;
use crate::error::RecorderError;
use crate::frame::{FrameData, FrameFormat};
use crate::mock::MemoryWriterFactory;
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;

fn frame(id: u64) -> FrameData {
    FrameData::new(
        id,
        SystemTime::now(),
        vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9],
        640,
        480,
        FrameFormat::Mjpeg,
    )
}

fn recorder(dir: &TempDir, factory: MemoryWriterFactory) -> Recorder {
    Recorder::new(
        5,
        "Camera_5",
        dir.path(),
        CodecCandidate::DEFAULT_PREFERENCE.to_vec(),
        Arc::new(factory),
    )
}

#[test]
fn test_second_start_is_rejected() {
    let dir = TempDir::new().unwrap();
    let factory = MemoryWriterFactory::all();
    let mut recorder = recorder(&dir, factory.clone());

    let first = recorder.start(640, 480, 20, false).unwrap();
    let second = recorder.start(640, 480, 20, false);

    assert!(matches!(second, Err(RecorderError::AlreadyRecording { .. })));
    assert_eq!(factory.open_writers(), 1);
    assert_eq!(factory.opened(), 1);
    assert_eq!(recorder.current().unwrap().path, first.path);
}

#[test]
fn test_stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let factory = MemoryWriterFactory::all();
    let mut recorder = recorder(&dir, factory.clone());

    assert!(recorder.stop().is_none());

    recorder.start(640, 480, 20, false).unwrap();
    let summary = recorder.stop().unwrap();
    assert_eq!(summary.codec, CodecCandidate::Vp8);
    assert!(recorder.stop().is_none());
    assert!(!recorder.is_recording());
    assert_eq!(factory.open_writers(), 0);
}

#[test]
fn test_first_working_candidate_wins() {
    let dir = TempDir::new().unwrap();
    let factory = MemoryWriterFactory::new(&[CodecCandidate::Xvid, CodecCandidate::MjpegStream]);
    let mut recorder = recorder(&dir, factory.clone());

    let info = recorder.start(1280, 720, 15, true).unwrap();
    assert_eq!(info.codec, CodecCandidate::Xvid);
    assert!(info.automatic);
    assert_eq!(info.path.extension().unwrap(), "avi");

    let file_name = info.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("Camera_5_"));

    let spec = &factory.opened_specs()[0];
    assert_eq!((spec.width, spec.height, spec.fps), (1280, 720, 15));
}

#[test]
fn test_no_codec_available() {
    let dir = TempDir::new().unwrap();
    let factory = MemoryWriterFactory::new(&[]);
    let mut recorder = recorder(&dir, factory.clone());

    let result = recorder.start(640, 480, 20, false);
    match result {
        Err(RecorderError::NoCodecAvailable { tried, .. }) => {
            assert_eq!(tried, "vp8, vp9, mjpeg, xvid, mjpeg_stream");
        }
        other => panic!("unexpected result: {:?}", other.map(|info| info.path)),
    }
    assert!(!recorder.is_recording());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_write_frame_only_while_recording() {
    let dir = TempDir::new().unwrap();
    let factory = MemoryWriterFactory::all();
    let mut recorder = recorder(&dir, factory.clone());

    assert!(recorder.write_frame(&frame(1)).is_none());
    assert_eq!(factory.frames_written(), 0);

    recorder.start(640, 480, 20, false).unwrap();
    recorder.write_frame(&frame(2));
    recorder.write_frame(&frame(3));
    let summary = recorder.stop().unwrap();

    assert_eq!(summary.frames_written, 2);

    // Frames after stop are not buffered
    recorder.write_frame(&frame(4));
    assert_eq!(factory.frames_written(), 2);
}

#[test]
fn test_writer_error_closes_session() {
    let dir = TempDir::new().unwrap();
    let factory = MemoryWriterFactory::all().failing_after(1);
    let mut recorder = recorder(&dir, factory.clone());

    recorder.start(640, 480, 20, false).unwrap();
    assert!(recorder.write_frame(&frame(1)).is_none());

    let closed = recorder.write_frame(&frame(2)).unwrap();
    assert_eq!(closed.frames_written, 1);
    assert!(!recorder.is_recording());
    assert_eq!(factory.open_writers(), 0);
}

#[test]
fn test_mjpeg_stream_writer_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut recorder = Recorder::new(
        2,
        "Camera_2",
        dir.path(),
        vec![CodecCandidate::MjpegStream],
        Arc::new(DefaultWriterFactory),
    );

    let info = recorder.start(640, 480, 20, false).unwrap();
    recorder.write_frame(&frame(1));
    recorder.write_frame(&frame(2));
    recorder.stop().unwrap();

    let bytes = std::fs::read(&info.path).unwrap();
    assert_eq!(bytes.len(), 12);
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_sessions_in_same_second_get_distinct_files() {
    let dir = TempDir::new().unwrap();
    let mut recorder = Recorder::new(
        2,
        "Camera_2",
        dir.path(),
        vec![CodecCandidate::MjpegStream],
        Arc::new(DefaultWriterFactory),
    );

    let first = recorder.start(640, 480, 20, false).unwrap();
    recorder.stop();
    let second = recorder.start(640, 480, 20, false).unwrap();
    recorder.stop();

    assert_ne!(first.path, second.path);
}

#[test]
fn test_codec_names_round_trip() {
    for codec in CodecCandidate::DEFAULT_PREFERENCE {
        assert_eq!(CodecCandidate::from_name(codec.name()), Some(codec));
    }
    assert_eq!(CodecCandidate::from_name("VP9"), Some(CodecCandidate::Vp9));
    assert_eq!(CodecCandidate::from_name("h265"), None);
}
