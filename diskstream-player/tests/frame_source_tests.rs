//! FrameSource integration tests against generated WAV files

mod helpers;

use diskstream_player::audio::{
    AudioBufferList, AudioFormatDescriptor, FolderLibrary, FrameSource, Layout, SampleType, TrackHandle,
    TrackId,
};
use diskstream_player::Error;
use helpers::{frame_index, generate_float_wav, generate_ramp_wav, write_garbage, TEST_SAMPLE_RATE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// 3 seconds at 44.1 kHz
const THREE_SECONDS: u64 = 132_300;

fn library_with_ramp(frames: u64) -> (TempDir, FrameSource) {
    let dir = tempfile::tempdir().unwrap();
    generate_ramp_wav(dir.path().join("ramp.wav"), frames, TEST_SAMPLE_RATE, 2).unwrap();
    let source = FrameSource::new(FolderLibrary::new(dir.path()));
    (dir, source)
}

fn open_ramp(source: &FrameSource) -> TrackHandle {
    source.open(&TrackId::from("ramp.wav")).unwrap()
}

/// Read the rest of the track in `request_frames` chunks, returning interleaved samples
fn read_all(handle: &mut TrackHandle, request_frames: usize) -> Vec<i16> {
    let mut list = AudioBufferList::new(handle.format(), request_frames);
    let mut out = Vec::new();
    loop {
        let result = {
            let mut request = list.request(request_frames).unwrap();
            handle.read_frames(&mut request)
        };
        out.extend(list.samples::<i16>(0, result.frames));
        if result.end_of_stream {
            return out;
        }
    }
}

#[test]
fn test_three_second_track_in_512_frame_requests() {
    let (_dir, source) = library_with_ramp(THREE_SECONDS);
    let mut handle = open_ramp(&source);

    let format = handle.format();
    assert_eq!(format, AudioFormatDescriptor::interleaved(44100, 2, SampleType::I16));
    assert_eq!(handle.total_frames(), Some(THREE_SECONDS));

    let mut list = AudioBufferList::new(format, 512);
    let mut calls = 0;
    let mut total = 0u64;
    let last = loop {
        let result = {
            let mut request = list.request(512).unwrap();
            handle.read_frames(&mut request)
        };
        calls += 1;
        total += result.frames as u64;

        if result.end_of_stream {
            break result;
        }
        assert_eq!(result.frames, 512, "short read without end-of-stream at call {}", calls);
    };

    assert_eq!(calls, 259);
    assert_eq!(last.frames, 204);
    assert_eq!(total, THREE_SECONDS);
    assert_eq!(handle.cursor(), THREE_SECONDS);
}

#[test]
fn test_reassembled_output_matches_asset() {
    let (_dir, source) = library_with_ramp(THREE_SECONDS);
    let mut handle = open_ramp(&source);

    let samples = read_all(&mut handle, 512);
    assert_eq!(samples.len() as u64, THREE_SECONDS * 2);

    for (expected, frame) in samples.chunks_exact(2).enumerate() {
        assert_eq!(frame_index(frame[0], frame[1]), expected as u64);
    }
}

#[test]
fn test_random_request_sizes_reassemble_identically() {
    let (_dir, source) = library_with_ramp(50_000);
    let reference = read_all(&mut open_ramp(&source), 512);

    let mut handle = open_ramp(&source);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut list = AudioBufferList::new(handle.format(), 2048);
    let mut reassembled = Vec::new();

    loop {
        let frames = rng.gen_range(1..=2048);
        let result = {
            let mut request = list.request(frames).unwrap();
            handle.read_frames(&mut request)
        };
        assert!(result.frames <= frames);
        reassembled.extend(list.samples::<i16>(0, result.frames));
        if result.end_of_stream {
            break;
        }
        assert_eq!(result.frames, frames);
    }

    assert_eq!(reassembled, reference);
}

#[test]
fn test_reads_never_touch_bytes_past_the_request() {
    let (_dir, source) = library_with_ramp(20_000);
    let mut handle = open_ramp(&source);

    let capacity = 1024;
    let mut list = AudioBufferList::new(handle.format(), capacity);
    let mut rng = StdRng::seed_from_u64(7);
    let bytes_per_frame = handle.format().bytes_per_frame();

    let mut sizes = vec![0, 1, 0, 1, capacity];
    sizes.extend((0..200).map(|_| rng.gen_range(0..=capacity)));

    for frames in sizes {
        list.fill(0xAA);
        let result = {
            let mut request = list.request(frames).unwrap();
            handle.read_frames(&mut request)
        };
        assert!(result.frames <= frames);

        let tail = &list.buffer(0)[frames * bytes_per_frame..];
        assert!(
            tail.iter().all(|&b| b == 0xAA),
            "request of {} frames wrote past its window",
            frames
        );

        if frames == 0 {
            assert_eq!(result.frames, 0);
        }
        if result.end_of_stream {
            break;
        }
    }
}

#[test]
fn test_end_of_stream_is_idempotent() {
    let (_dir, source) = library_with_ramp(1000);
    let mut handle = open_ramp(&source);
    read_all(&mut handle, 256);
    assert!(handle.is_end_of_stream());

    let mut list = AudioBufferList::new(handle.format(), 256);
    for _ in 0..3 {
        let mut request = list.request(256).unwrap();
        let result = handle.read_frames(&mut request);
        assert_eq!(result.frames, 0);
        assert!(result.end_of_stream);
    }
    assert_eq!(handle.cursor(), 1000);
    assert!(!handle.has_failed());
    assert!(handle.take_failure().is_none());
}

#[test]
fn test_request_in_other_layout_ends_stream() {
    let (_dir, source) = library_with_ramp(1000);
    let mut handle = open_ramp(&source);
    let float = AudioFormatDescriptor::interleaved(44100, 2, SampleType::F32);

    let mut list = AudioBufferList::new(float, 64);
    list.fill(0xAB);
    {
        let mut request = list.request(64).unwrap();
        let result = handle.read_frames(&mut request);
        assert_eq!(result.frames, 0);
        assert!(result.end_of_stream);
    }
    assert!(list.buffer(0).iter().all(|&b| b == 0xAB));
    assert!(handle.has_failed());
    assert_eq!(handle.cursor(), 0);

    match handle.take_failure() {
        Some(Error::FormatMismatch { expected, actual }) => {
            assert_eq!(expected, handle.format());
            assert_eq!(actual, float);
        }
        other => panic!("expected FormatMismatch, got {:?}", other),
    }
    assert!(handle.take_failure().is_none());

    // The stream stays ended until a seek
    let mut list = AudioBufferList::new(handle.format(), 64);
    let mut request = list.request(64).unwrap();
    assert_eq!(handle.read_frames(&mut request).frames, 0);
}

#[test]
fn test_file_truncated_while_open_is_io_failure() {
    let (dir, source) = library_with_ramp(200_000);
    let mut handle = open_ramp(&source);
    assert_eq!(handle.total_frames(), Some(200_000));

    let mut list = AudioBufferList::new(handle.format(), 512);
    {
        let mut request = list.request(512).unwrap();
        assert_eq!(handle.read_frames(&mut request).frames, 512);
    }

    std::fs::OpenOptions::new()
        .write(true)
        .open(dir.path().join("ramp.wav"))
        .unwrap()
        .set_len(100_000)
        .unwrap();

    let rest = read_all(&mut handle, 512);
    let delivered = handle.cursor();
    assert_eq!(delivered, 512 + (rest.len() / 2) as u64);
    assert!(delivered < 200_000);
    assert!(handle.is_end_of_stream());
    assert!(handle.has_failed());

    match handle.take_failure() {
        Some(Error::Io(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
            assert!(e.to_string().contains("truncated"));
        }
        other => panic!("expected an I/O failure, got {:?}", other),
    }
}

#[test]
fn test_seek_zero_matches_fresh_open() {
    let (_dir, source) = library_with_ramp(30_000);
    let fresh = read_all(&mut open_ramp(&source), 512);

    let mut handle = open_ramp(&source);
    let mut list = AudioBufferList::new(handle.format(), 4096);
    for _ in 0..3 {
        let mut request = list.request(4096).unwrap();
        handle.read_frames(&mut request);
    }
    assert_eq!(handle.cursor(), 3 * 4096);

    handle.seek(0).unwrap();
    assert_eq!(handle.cursor(), 0);
    assert_eq!(read_all(&mut handle, 512), fresh);
}

#[test]
fn test_seek_lands_on_exact_frame() {
    let (_dir, source) = library_with_ramp(THREE_SECONDS);
    let mut handle = open_ramp(&source);
    let probe = handle.position_probe();

    for target in [44_100u64, 100_001, 7, 65_536] {
        handle.seek(target).unwrap();
        assert_eq!(probe.frames(), target);

        let mut list = AudioBufferList::new(handle.format(), 16);
        let result = {
            let mut request = list.request(16).unwrap();
            handle.read_frames(&mut request)
        };
        assert_eq!(result.frames, 16);
        let samples = list.samples::<i16>(0, 16);
        assert_eq!(frame_index(samples[0], samples[1]), target);
        assert_eq!(handle.cursor(), target + 16);
    }
}

#[test]
fn test_seek_after_end_clears_end_of_stream() {
    let (_dir, source) = library_with_ramp(5000);
    let mut handle = open_ramp(&source);
    read_all(&mut handle, 1000);
    assert!(handle.is_end_of_stream());

    handle.seek(4000).unwrap();
    assert!(!handle.is_end_of_stream());
    let rest = read_all(&mut handle, 1000);
    assert_eq!(rest.len(), 2000);
}

#[test]
fn test_seek_bounds() {
    let (_dir, source) = library_with_ramp(THREE_SECONDS);
    let mut handle = open_ramp(&source);

    match handle.seek(THREE_SECONDS + 1) {
        Err(Error::SeekOutOfRange { requested, length }) => {
            assert_eq!(requested, THREE_SECONDS + 1);
            assert_eq!(length, THREE_SECONDS);
        }
        other => panic!("expected SeekOutOfRange, got {:?}", other.map(|_| ())),
    }
    assert_eq!(handle.cursor(), 0);

    // Seeking to exactly the length is allowed and ends the stream immediately
    handle.seek(THREE_SECONDS).unwrap();
    let mut list = AudioBufferList::new(handle.format(), 512);
    let mut request = list.request(512).unwrap();
    let result = handle.read_frames(&mut request);
    assert_eq!(result.frames, 0);
    assert!(result.end_of_stream);
}

#[test]
fn test_missing_asset() {
    let (_dir, source) = library_with_ramp(100);
    let result = source.open(&TrackId::from("nope.wav"));
    assert!(matches!(result, Err(Error::AssetNotFound(_))));
}

#[test]
fn test_undecodable_asset() {
    let dir = tempfile::tempdir().unwrap();
    write_garbage(dir.path().join("noise.wav")).unwrap();
    std::fs::write(dir.path().join("empty.flac"), b"").unwrap();
    let source = FrameSource::new(FolderLibrary::new(dir.path()));

    for id in ["noise.wav", "empty.flac"] {
        let result = source.open(&TrackId::from(id));
        assert!(
            matches!(result, Err(Error::UnsupportedFormat(_))),
            "{} should be unsupported",
            id
        );
    }
}

#[test]
fn test_planar_output_splits_channels() {
    let (_dir, source) = library_with_ramp(40_000);
    let mut handle = open_ramp(&source);
    let planar = AudioFormatDescriptor::planar(44100, 2, SampleType::I16);
    handle.set_output_format(planar).unwrap();

    let mut list = AudioBufferList::new(planar, 1000);
    handle.seek(31_500).unwrap();
    {
        let mut request = list.request(1000).unwrap();
        assert_eq!(handle.read_frames(&mut request).frames, 1000);
    }

    let left = list.samples::<i16>(0, 1000);
    let right = list.samples::<i16>(1, 1000);
    for i in 0..1000 {
        assert_eq!(frame_index(left[i], right[i]), 31_500 + i as u64);
    }
}

#[test]
fn test_float_output_from_integer_asset() {
    let (_dir, source) = library_with_ramp(20_000);
    let mut handle = open_ramp(&source);
    let float = AudioFormatDescriptor::interleaved(44100, 2, SampleType::F32);
    handle.set_output_format(float).unwrap();
    handle.seek(16_384).unwrap();

    let mut list = AudioBufferList::new(float, 1);
    {
        let mut request = list.request(1).unwrap();
        assert_eq!(handle.read_frames(&mut request).frames, 1);
    }
    let samples = list.samples::<f32>(0, 1);
    assert!((samples[0] - 0.5).abs() < 1e-4, "left was {}", samples[0]);
    assert_eq!(samples[1], 0.0);
}

#[test]
fn test_float_asset_native_format() {
    let dir = tempfile::tempdir().unwrap();
    generate_float_wav(dir.path().join("float.wav"), 4000).unwrap();
    let source = FrameSource::new(FolderLibrary::new(dir.path()));
    let mut handle = source.open(&TrackId::from("float.wav")).unwrap();

    assert_eq!(handle.native_format().sample_type, SampleType::F32);
    let mut list = AudioBufferList::new(handle.format(), 4000);
    {
        let mut request = list.request(4000).unwrap();
        assert_eq!(handle.read_frames(&mut request).frames, 4000);
    }
    let samples = list.samples::<f32>(0, 4000);
    assert_eq!(samples[2000 * 2], 0.5);
    assert_eq!(samples[2000 * 2 + 1], -0.5);
}

#[test]
fn test_rate_or_channel_change_is_format_mismatch() {
    let (_dir, source) = library_with_ramp(100);
    let mut handle = open_ramp(&source);

    let other_rate = AudioFormatDescriptor::interleaved(48000, 2, SampleType::I16);
    assert!(matches!(
        handle.set_output_format(other_rate),
        Err(Error::FormatMismatch { .. })
    ));
    let mono = AudioFormatDescriptor::interleaved(44100, 1, SampleType::I16);
    assert!(matches!(handle.set_output_format(mono), Err(Error::FormatMismatch { .. })));
    assert_eq!(handle.format().layout, Layout::Interleaved);
}

#[test]
fn test_close_is_idempotent() {
    let (_dir, source) = library_with_ramp(1000);
    let mut handle = open_ramp(&source);
    handle.close();
    handle.close();
    assert!(handle.is_closed());

    let mut list = AudioBufferList::new(handle.format(), 64);
    let mut request = list.request(64).unwrap();
    let result = handle.read_frames(&mut request);
    assert_eq!(result.frames, 0);
    assert!(result.end_of_stream);
    assert!(matches!(handle.seek(0), Err(Error::InvalidState(_))));
}

#[test]
fn test_duration_and_probe() {
    let (_dir, source) = library_with_ramp(THREE_SECONDS);
    let mut handle = open_ramp(&source);
    assert_eq!(handle.duration(), Some(std::time::Duration::from_secs(3)));

    let probe = handle.position_probe();
    let mut list = AudioBufferList::new(handle.format(), 22_050);
    let mut request = list.request(22_050).unwrap();
    handle.read_frames(&mut request);
    assert_eq!(probe.frames(), 22_050);
    assert_eq!(probe.elapsed(), std::time::Duration::from_millis(500));
}
