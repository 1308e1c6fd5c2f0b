//! Buffer transfer contract between the output callback and the data source
//!
//! A `BufferRequest` is what one device callback asks for: a frame count plus the
//! destination buffer list. The data source only ever sees a window of exactly
//! `frames × bytes_per_buffer_frame` bytes per buffer, so it cannot write past the
//! declared capacity no matter how large the underlying device buffers are.
//!
//! Short reads are reported through `FillResult`; padding the unwritten tail with
//! silence is the caller's decision (`BufferRequest::fill_silence`).

use crate::audio::format::{AudioFormatDescriptor, Layout, SampleType};
use crate::error::{Error, Result};

/// A PCM sample type that can be written into device memory
pub trait PcmSample: Copy + Default {
    /// Matching descriptor sample type
    const TYPE: SampleType;

    /// Write native-endian bytes; `out.len()` equals the sample width
    fn write_ne(self, out: &mut [u8]);

    /// Read a sample back from native-endian bytes
    fn read_ne(bytes: &[u8]) -> Self;
}

impl PcmSample for i16 {
    const TYPE: SampleType = SampleType::I16;

    #[inline]
    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }

    #[inline]
    fn read_ne(bytes: &[u8]) -> Self {
        i16::from_ne_bytes([bytes[0], bytes[1]])
    }
}

impl PcmSample for i32 {
    const TYPE: SampleType = SampleType::I32;

    #[inline]
    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }

    #[inline]
    fn read_ne(bytes: &[u8]) -> Self {
        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl PcmSample for f32 {
    const TYPE: SampleType = SampleType::F32;

    #[inline]
    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }

    #[inline]
    fn read_ne(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Outcome of one `read_frames` call
///
/// `frames < requested` implies `end_of_stream` now or on the next call. Once
/// `end_of_stream` is reported with zero frames, every later call reports the
/// same.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillResult {
    /// Frames actually written, starting at frame 0 of the request
    pub frames: usize,
    /// No further frames will follow
    pub end_of_stream: bool,
}

impl FillResult {
    /// Frames written, more to come
    pub const fn frames(frames: usize) -> Self {
        Self {
            frames,
            end_of_stream: false,
        }
    }

    /// Frames written, and nothing after them
    pub const fn end(frames: usize) -> Self {
        Self {
            frames,
            end_of_stream: true,
        }
    }
}

/// One fill request: frame count plus the destination buffers
pub struct BufferRequest<'a, B> {
    format: AudioFormatDescriptor,
    frames: usize,
    buffers: &'a mut [B],
}

impl<'a, B: AsMut<[u8]>> BufferRequest<'a, B> {
    /// Build a request over caller-owned buffers
    ///
    /// Fails if the buffer count does not match the format's layout, or if any
    /// buffer is too small for `frames`. Never allocates.
    pub fn new(format: AudioFormatDescriptor, frames: usize, buffers: &'a mut [B]) -> Result<Self> {
        if buffers.len() != format.buffer_count() {
            return Err(Error::BufferCount {
                expected: format.buffer_count(),
                actual: buffers.len(),
            });
        }

        let required = format.buffer_bytes(frames);
        for buffer in buffers.iter_mut() {
            let actual = buffer.as_mut().len();
            if actual < required {
                return Err(Error::BufferCapacity { required, actual });
            }
        }

        Ok(Self {
            format,
            frames,
            buffers,
        })
    }

    /// Requested frame count
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Layout the destination expects
    pub fn format(&self) -> &AudioFormatDescriptor {
        &self.format
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Writable window of buffer `index`, exactly the requested frames long
    pub fn buffer_mut(&mut self, index: usize) -> &mut [u8] {
        let len = self.format.buffer_bytes(self.frames);
        &mut self.buffers[index].as_mut()[..len]
    }

    /// Copy interleaved samples into the request starting at frame `at_frame`
    ///
    /// Writes as many whole frames as both `interleaved` and the remaining window
    /// allow, converting to planar layout when the format asks for it. Returns
    /// the number of frames written.
    pub fn write_frames<T: PcmSample>(&mut self, at_frame: usize, interleaved: &[T]) -> usize {
        debug_assert_eq!(T::TYPE, self.format.sample_type);

        let channels = self.format.channels as usize;
        if channels == 0 {
            return 0;
        }
        let available = interleaved.len() / channels;
        let count = available.min(self.frames.saturating_sub(at_frame));
        if count == 0 {
            return 0;
        }

        let width = self.format.bytes_per_sample();
        match self.format.layout {
            Layout::Interleaved => {
                let start = at_frame * channels * width;
                let end = start + count * channels * width;
                let window = &mut self.buffer_mut(0)[start..end];
                for (out, sample) in window.chunks_exact_mut(width).zip(&interleaved[..count * channels]) {
                    sample.write_ne(out);
                }
            }
            Layout::Planar => {
                for channel in 0..channels {
                    let start = at_frame * width;
                    let end = start + count * width;
                    let window = &mut self.buffer_mut(channel)[start..end];
                    let samples = interleaved[..count * channels].iter().skip(channel).step_by(channels);
                    for (out, sample) in window.chunks_exact_mut(width).zip(samples) {
                        sample.write_ne(out);
                    }
                }
            }
        }

        count
    }

    /// Zero every buffer from `from_frame` to the end of the request
    ///
    /// All supported sample types are signed, so zero bytes are silence.
    pub fn fill_silence(&mut self, from_frame: usize) {
        if from_frame >= self.frames {
            return;
        }
        let start = self.format.buffer_bytes(from_frame);
        for index in 0..self.buffers.len() {
            self.buffer_mut(index)[start..].fill(0);
        }
    }
}

/// The data-source capability Output pulls from
///
/// `read_frames` is called synchronously from the real-time context. Implementors
/// must not block on locks the control context may hold, must not allocate, and
/// should bound their worst-case latency; a slow call is heard as a gap.
pub trait DataSource: Send {
    /// Layout `read_frames` writes in
    fn format(&self) -> AudioFormatDescriptor;

    /// Fill up to `request.frames()` frames, starting at frame 0 of the request
    fn read_frames<B: AsMut<[u8]>>(&mut self, request: &mut BufferRequest<'_, B>) -> FillResult;

    /// Whether a mid-stream failure ended the stream. Must not allocate.
    fn has_failed(&self) -> bool {
        false
    }

    /// Description of a mid-stream failure, if one ended the stream
    ///
    /// Control context only; may allocate.
    fn failure_message(&self) -> Option<String> {
        None
    }
}

/// Owned, pre-allocated buffer list for callers that are not a device
pub struct AudioBufferList {
    format: AudioFormatDescriptor,
    frame_capacity: usize,
    buffers: Vec<Vec<u8>>,
}

impl AudioBufferList {
    /// Allocate zeroed buffers able to hold `frame_capacity` frames
    pub fn new(format: AudioFormatDescriptor, frame_capacity: usize) -> Self {
        let buffers = (0..format.buffer_count())
            .map(|_| vec![0u8; format.buffer_bytes(frame_capacity)])
            .collect();
        Self {
            format,
            frame_capacity,
            buffers,
        }
    }

    pub fn format(&self) -> &AudioFormatDescriptor {
        &self.format
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Overwrite every byte of every buffer with `byte`
    pub fn fill(&mut self, byte: u8) {
        for buffer in &mut self.buffers {
            buffer.fill(byte);
        }
    }

    /// Request `frames` frames into this list
    pub fn request(&mut self, frames: usize) -> Result<BufferRequest<'_, Vec<u8>>> {
        BufferRequest::new(self.format, frames, self.buffers.as_mut_slice())
    }

    /// Full backing storage of buffer `index`
    pub fn buffer(&self, index: usize) -> &[u8] {
        &self.buffers[index]
    }

    /// Decode the first `frames` frames of buffer `index` back into samples
    pub fn samples<T: PcmSample>(&self, index: usize, frames: usize) -> Vec<T> {
        let width = T::TYPE.bytes();
        let len = self.format.buffer_bytes(frames).min(self.buffers[index].len());
        self.buffers[index][..len].chunks_exact(width).map(T::read_ne).collect()
    }
}
