//! Audio test file generation
//!
//! Generates WAV files with known content so decoded output can be checked
//! sample for sample:
//! - Ramp files encode each frame's index in its samples
//! - Sine and float files exercise conversion paths

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44100;

/// Left channel of a ramp file counts 0..RAMP_PERIOD, right counts periods
pub const RAMP_PERIOD: u64 = 32000;

/// Frame index encoded in a ramp file's left/right sample pair
pub fn frame_index(left: i16, right: i16) -> u64 {
    right as u64 * RAMP_PERIOD + left as u64
}

/// Generate a 16-bit ramp WAV of `frames` frames
///
/// Channel 0 holds `index % RAMP_PERIOD`, channel 1 holds `index / RAMP_PERIOD`,
/// further channels repeat channel 0 negated.
pub fn generate_ramp_wav<P: AsRef<Path>>(
    path: P,
    frames: u64,
    sample_rate: u32,
    channels: u16,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;

    for index in 0..frames {
        let left = (index % RAMP_PERIOD) as i16;
        let right = (index / RAMP_PERIOD) as i16;
        for channel in 0..channels {
            let sample = match channel {
                0 => left,
                1 => right,
                _ => -left,
            };
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Generate sine wave stereo WAV file
///
/// # Arguments
/// * `path` - Output file path
/// * `duration_ms` - Duration in milliseconds
/// * `frequency_hz` - Sine wave frequency in Hz (e.g., 440.0 for A4)
/// * `amplitude` - Amplitude 0.0-1.0 (0.5 recommended to avoid clipping)
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = (TEST_SAMPLE_RATE as u64 * duration_ms) / 1000;
    let amplitude_i16 = (amplitude * i16::MAX as f32) as i16;

    for frame_idx in 0..total_frames {
        let t = frame_idx as f32 / TEST_SAMPLE_RATE as f32;
        let sample_value = (2.0 * PI * frequency_hz * t).sin();
        let sample_i16 = (sample_value * amplitude_i16 as f32) as i16;

        writer.write_sample(sample_i16)?;
        writer.write_sample(sample_i16)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Generate a 32-bit float stereo WAV where frame `i` holds `i / frames` on both channels
pub fn generate_float_wav<P: AsRef<Path>>(path: P, frames: u64) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for index in 0..frames {
        let value = index as f32 / frames as f32;
        writer.write_sample(value)?;
        writer.write_sample(-value)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Write plain text, which holds no container marker any decoder recognizes
pub fn write_garbage<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    std::fs::write(path, "this is not audio data\n".repeat(200))
}
