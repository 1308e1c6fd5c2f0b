//! In-memory data sources for exercising Output without a decoder

use diskstream_player::audio::{AudioFormatDescriptor, BufferRequest, DataSource, FillResult, SampleType};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Plays back a fixed list of interleaved i16 samples
pub struct VecSource {
    format: AudioFormatDescriptor,
    samples: Vec<i16>,
    cursor: usize,
}

impl VecSource {
    /// `frames` frames of stereo 44.1 kHz, sample value = frame index (wrapping)
    pub fn counting(frames: usize) -> Self {
        let samples = (0..frames)
            .flat_map(|i| {
                let v = i as i16;
                [v, v]
            })
            .collect();
        Self {
            format: AudioFormatDescriptor::interleaved(44100, 2, SampleType::I16),
            samples,
            cursor: 0,
        }
    }

    pub fn with_format(mut self, format: AudioFormatDescriptor) -> Self {
        self.format = format;
        self
    }
}

impl DataSource for VecSource {
    fn format(&self) -> AudioFormatDescriptor {
        self.format
    }

    fn read_frames<B: AsMut<[u8]>>(&mut self, request: &mut BufferRequest<'_, B>) -> FillResult {
        let channels = self.format.channels as usize;
        let written = request.write_frames(0, &self.samples[self.cursor..]);
        self.cursor += written * channels;
        FillResult {
            frames: written,
            end_of_stream: self.cursor >= self.samples.len(),
        }
    }
}

/// Observations shared between a `SlowSource` and the test
#[derive(Default)]
pub struct SlowState {
    pub calls: AtomicUsize,
    pub in_read: AtomicBool,
    pub closed: AtomicBool,
    pub read_after_close: AtomicBool,
}

/// Never-ending source whose every read takes `delay`
pub struct SlowSource {
    format: AudioFormatDescriptor,
    delay: Duration,
    pub state: Arc<SlowState>,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            format: AudioFormatDescriptor::interleaved(44100, 2, SampleType::I16),
            delay,
            state: Arc::new(SlowState::default()),
        }
    }

    /// Mark the source closed; any read after this is recorded
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

impl DataSource for SlowSource {
    fn format(&self) -> AudioFormatDescriptor {
        self.format
    }

    fn read_frames<B: AsMut<[u8]>>(&mut self, request: &mut BufferRequest<'_, B>) -> FillResult {
        self.state.in_read.store(true, Ordering::SeqCst);
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if self.state.closed.load(Ordering::SeqCst) {
            self.state.read_after_close.store(true, Ordering::SeqCst);
        }

        std::thread::sleep(self.delay);
        request.buffer_mut(0).fill(0x01);

        self.state.in_read.store(false, Ordering::SeqCst);
        FillResult::frames(request.frames())
    }
}

/// Delivers `good_frames` frames, then fails
pub struct FailingSource {
    format: AudioFormatDescriptor,
    remaining: usize,
    failed: bool,
}

impl FailingSource {
    pub fn new(good_frames: usize) -> Self {
        Self {
            format: AudioFormatDescriptor::interleaved(44100, 2, SampleType::I16),
            remaining: good_frames,
            failed: false,
        }
    }
}

impl DataSource for FailingSource {
    fn format(&self) -> AudioFormatDescriptor {
        self.format
    }

    fn read_frames<B: AsMut<[u8]>>(&mut self, request: &mut BufferRequest<'_, B>) -> FillResult {
        let frames = request.frames().min(self.remaining);
        let bytes = self.format.buffer_bytes(frames);
        request.buffer_mut(0)[..bytes].fill(0x22);
        self.remaining -= frames;
        if self.remaining == 0 {
            self.failed = true;
            return FillResult::end(frames);
        }
        FillResult::frames(frames)
    }

    fn has_failed(&self) -> bool {
        self.failed
    }

    fn failure_message(&self) -> Option<String> {
        self.failed.then(|| "simulated read failure".to_string())
    }
}
