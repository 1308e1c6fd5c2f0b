//! Audio format descriptors
//!
//! The descriptor is the one bit-exact contract between the decoder and the
//! device: sample rate, channel count, sample representation and buffer layout.
//! Samples are always native-endian in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Sample representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// 32-bit float, nominal range [-1.0, 1.0]
    F32,
}

impl SampleType {
    /// Width of one sample in bytes
    pub const fn bytes(self) -> usize {
        match self {
            SampleType::I16 => 2,
            SampleType::I32 | SampleType::F32 => 4,
        }
    }

    /// Whether samples are floating point
    pub const fn is_float(self) -> bool {
        matches!(self, SampleType::F32)
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleType::I16 => write!(f, "i16"),
            SampleType::I32 => write!(f, "i32"),
            SampleType::F32 => write!(f, "f32"),
        }
    }
}

impl FromStr for SampleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i16" | "s16" => Ok(SampleType::I16),
            "i32" | "s32" => Ok(SampleType::I32),
            "f32" | "float" => Ok(SampleType::F32),
            other => Err(format!("unknown sample format '{}' (expected i16, i32 or f32)", other)),
        }
    }
}

/// Channel layout across the buffer list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One buffer, channel samples alternate: [L, R, L, R, ...]
    Interleaved,
    /// One buffer per channel
    Planar,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Interleaved => write!(f, "interleaved"),
            Layout::Planar => write!(f, "planar"),
        }
    }
}

/// Complete description of a PCM stream as laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormatDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_type: SampleType,
    pub layout: Layout,
}

impl AudioFormatDescriptor {
    pub const fn new(sample_rate: u32, channels: u16, sample_type: SampleType, layout: Layout) -> Self {
        Self {
            sample_rate,
            channels,
            sample_type,
            layout,
        }
    }

    pub const fn interleaved(sample_rate: u32, channels: u16, sample_type: SampleType) -> Self {
        Self::new(sample_rate, channels, sample_type, Layout::Interleaved)
    }

    pub const fn planar(sample_rate: u32, channels: u16, sample_type: SampleType) -> Self {
        Self::new(sample_rate, channels, sample_type, Layout::Planar)
    }

    pub const fn bytes_per_sample(&self) -> usize {
        self.sample_type.bytes()
    }

    /// Bytes of one frame across all channels
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_type.bytes()
    }

    /// Number of buffers a buffer list for this format holds
    pub const fn buffer_count(&self) -> usize {
        match self.layout {
            Layout::Interleaved => 1,
            Layout::Planar => self.channels as usize,
        }
    }

    /// Channels carried by each buffer of the list
    pub const fn channels_per_buffer(&self) -> usize {
        match self.layout {
            Layout::Interleaved => self.channels as usize,
            Layout::Planar => 1,
        }
    }

    /// Bytes one frame occupies within a single buffer of the list
    pub const fn bytes_per_buffer_frame(&self) -> usize {
        self.channels_per_buffer() * self.sample_type.bytes()
    }

    /// Bytes each buffer needs to hold `frames` frames
    pub const fn buffer_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_buffer_frame()
    }

    pub fn with_sample_type(self, sample_type: SampleType) -> Self {
        Self { sample_type, ..self }
    }

    pub fn with_layout(self, layout: Layout) -> Self {
        Self { layout, ..self }
    }

    /// Same rate and channel count, i.e. convertible without resampling or remixing
    pub fn same_stream_shape(&self, other: &AudioFormatDescriptor) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Playback time covered by `frames` frames
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let secs = frames / self.sample_rate as u64;
        let rem = frames % self.sample_rate as u64;
        Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Frame index at `duration` into the stream (rounded down)
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as u64
    }
}

impl fmt::Display for AudioFormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}, {}",
            self.sample_rate, self.channels, self.sample_type, self.layout
        )
    }
}

/// Caller preferences passed to `Output::configure`
///
/// Every field is optional; the device fills in whatever is left open with its
/// own preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatHint {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub sample_type: Option<SampleType>,
    pub layout: Option<Layout>,
}

impl FormatHint {
    /// Hint asking for exactly `format`
    pub fn exact(format: AudioFormatDescriptor) -> Self {
        Self {
            sample_rate: Some(format.sample_rate),
            channels: Some(format.channels),
            sample_type: Some(format.sample_type),
            layout: Some(format.layout),
        }
    }

    /// Fill the open fields of the hint from `fallback`
    pub fn resolve(&self, fallback: AudioFormatDescriptor) -> AudioFormatDescriptor {
        AudioFormatDescriptor {
            sample_rate: self.sample_rate.unwrap_or(fallback.sample_rate),
            channels: self.channels.unwrap_or(fallback.channels),
            sample_type: self.sample_type.unwrap_or(fallback.sample_type),
            layout: self.layout.unwrap_or(fallback.layout),
        }
    }
}
