//! PlaybackController tests: select, play, seek and end-of-track on real WAV files

mod helpers;

use diskstream_common::events::{EventBus, OutputState, PlaybackEvent};
use diskstream_player::audio::{
    AudioFormatDescriptor, FolderLibrary, FormatHint, FrameSource, NullBackend, SampleType, TrackId,
};
use diskstream_player::playback::PlaybackController;
use diskstream_player::Error;
use helpers::{generate_ramp_wav, generate_sine_wav, wait_until, TEST_SAMPLE_RATE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn library_with_ramp(frames: u64) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    generate_ramp_wav(dir.path().join("ramp.wav"), frames, TEST_SAMPLE_RATE, 2).unwrap();
    dir
}

fn controller(dir: &TempDir, backend: NullBackend) -> PlaybackController<NullBackend> {
    PlaybackController::new(
        FrameSource::new(FolderLibrary::new(dir.path())),
        backend,
        EventBus::new(256),
    )
    .with_frames_per_buffer(Some(256))
}

fn fast_clock() -> NullBackend {
    NullBackend::flexible().with_period(Duration::from_micros(100))
}

#[test]
fn test_select_and_play_to_end() {
    let dir = library_with_ramp(10_000);
    let backend = fast_clock();
    let callbacks = backend.callback_counter();
    let mut player = controller(&dir, backend);
    let mut rx = player.subscribe();

    let ended = Arc::new(AtomicUsize::new(0));
    let ended_count = Arc::clone(&ended);
    player.on_end_of_track(move || {
        ended_count.fetch_add(1, Ordering::SeqCst);
    });

    let format = player.select_track(&TrackId::from("ramp.wav")).unwrap();
    assert_eq!(format, AudioFormatDescriptor::interleaved(44100, 2, SampleType::I16));
    assert_eq!(player.state(), OutputState::Configured);
    assert_eq!(player.current_track(), Some(&TrackId::from("ramp.wav")));
    assert_eq!(player.position_frames(), Some(0));

    let duration = player.duration().unwrap();
    assert!((duration.as_secs_f64() - 10_000.0 / 44_100.0).abs() < 1e-6);

    player.play().unwrap();
    assert!(wait_until(TIMEOUT, || ended.load(Ordering::SeqCst) == 1));

    assert_eq!(player.state(), OutputState::Stopped);
    assert_eq!(player.position_frames(), Some(10_000));
    assert_eq!(player.stats().frames_delivered, 10_000);

    // The device loop halts on its own; no silent callbacks follow
    std::thread::sleep(Duration::from_millis(20));
    let at_end = callbacks.get();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(callbacks.get(), at_end);

    let mut selected = false;
    while let Ok(event) = rx.try_recv() {
        if let PlaybackEvent::TrackSelected {
            track_id, total_frames, ..
        } = event
        {
            assert_eq!(track_id, "ramp.wav");
            assert_eq!(total_frames, Some(10_000));
            selected = true;
        }
    }
    assert!(selected);

    player.stop().unwrap();
    assert_eq!(player.current_track(), None);
}

#[test]
fn test_play_without_selection() {
    let dir = library_with_ramp(1000);
    let mut player = controller(&dir, fast_clock());

    assert!(matches!(player.play(), Err(Error::InvalidState(_))));
    assert!(matches!(player.seek(Duration::ZERO), Err(Error::InvalidState(_))));
    assert_eq!(player.position(), None);
    player.stop().unwrap();
    assert_eq!(player.state(), OutputState::Idle);
}

#[test]
fn test_missing_track_leaves_controller_idle() {
    let dir = library_with_ramp(1000);
    let mut player = controller(&dir, fast_clock());

    let result = player.select_track(&TrackId::from("absent.flac"));
    assert!(matches!(result, Err(Error::AssetNotFound(_))));
    assert_eq!(player.state(), OutputState::Idle);
    assert_eq!(player.current_track(), None);
}

#[test]
fn test_device_at_other_rate_is_format_mismatch() {
    let dir = library_with_ramp(1000);
    let device = AudioFormatDescriptor::interleaved(48000, 2, SampleType::I16);
    let backend = NullBackend::new(device).with_period(Duration::ZERO);
    let callbacks = backend.callback_counter();
    let mut player = controller(&dir, backend);

    let result = player.select_track(&TrackId::from("ramp.wav"));
    assert!(matches!(result, Err(Error::FormatMismatch { .. })));
    assert_eq!(player.current_track(), None);
    assert!(matches!(player.play(), Err(Error::InvalidState(_))));
    assert_eq!(callbacks.get(), 0);
}

#[test]
fn test_play_after_end_restarts() {
    let dir = library_with_ramp(4000);
    let mut player = controller(&dir, fast_clock());

    let ended = Arc::new(AtomicUsize::new(0));
    let ended_count = Arc::clone(&ended);
    player.on_end_of_track(move || {
        ended_count.fetch_add(1, Ordering::SeqCst);
    });

    player.select_track(&TrackId::from("ramp.wav")).unwrap();
    player.play().unwrap();
    assert!(wait_until(TIMEOUT, || ended.load(Ordering::SeqCst) == 1));

    player.play().unwrap();
    assert!(wait_until(TIMEOUT, || ended.load(Ordering::SeqCst) == 2));
    assert_eq!(player.position_frames(), Some(4000));

    // Stats cover the current session only
    assert_eq!(player.stats().frames_delivered, 4000);
    player.stop().unwrap();
}

#[test]
fn test_seek_while_paused() {
    let dir = tempfile::tempdir().unwrap();
    generate_sine_wav(dir.path().join("tone.wav"), 5000, 440.0, 0.5).unwrap();
    let mut player = controller(&dir, NullBackend::flexible().with_period(Duration::from_millis(2)));

    player.select_track(&TrackId::from("tone.wav")).unwrap();
    player.play().unwrap();
    assert!(wait_until(TIMEOUT, || player.position_frames().unwrap_or(0) > 0));

    player.pause().unwrap();
    assert_eq!(player.state(), OutputState::Paused);

    player.seek(Duration::from_secs(3)).unwrap();
    assert_eq!(player.position_frames(), Some(3 * 44_100));
    assert_eq!(player.position(), Some(Duration::from_secs(3)));

    let past_end = player.seek(Duration::from_secs(6));
    assert!(matches!(past_end, Err(Error::SeekOutOfRange { .. })));
    assert_eq!(player.position_frames(), Some(3 * 44_100));

    player.play().unwrap();
    assert_eq!(player.state(), OutputState::Running);
    assert!(wait_until(TIMEOUT, || player.position_frames().unwrap_or(0) > 3 * 44_100));

    player.toggle().unwrap();
    assert_eq!(player.state(), OutputState::Paused);
    player.stop().unwrap();
    assert_eq!(player.state(), OutputState::Stopped);
}

#[test]
fn test_selecting_new_track_replaces_old() {
    let dir = library_with_ramp(100_000);
    generate_ramp_wav(dir.path().join("tone.wav"), 22050, 22050, 2).unwrap();
    let mut player = controller(&dir, NullBackend::flexible().with_period(Duration::from_millis(2)));

    player.select_track(&TrackId::from("ramp.wav")).unwrap();
    player.play().unwrap();
    assert_eq!(player.state(), OutputState::Running);

    let format = player.select_track(&TrackId::from("tone.wav")).unwrap();
    assert_eq!(format.sample_rate, 22050);
    assert_eq!(player.state(), OutputState::Configured);
    assert_eq!(player.current_track(), Some(&TrackId::from("tone.wav")));
    assert_eq!(player.position_frames(), Some(0));
}

#[test]
fn test_float_hint_converts_track() {
    let dir = library_with_ramp(2000);
    let mut player = controller(&dir, fast_clock()).with_format_hint(FormatHint {
        sample_type: Some(SampleType::F32),
        ..Default::default()
    });

    let format = player.select_track(&TrackId::from("ramp.wav")).unwrap();
    assert_eq!(format, AudioFormatDescriptor::interleaved(44100, 2, SampleType::F32));
    assert_eq!(player.format(), Some(format));
    assert_eq!(player.output().format(), Some(format));
}
