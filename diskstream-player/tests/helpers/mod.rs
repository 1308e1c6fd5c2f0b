//! Test helper modules for diskstream-player integration tests
//!
//! Provides reusable test infrastructure components:
//! - audio_generator: deterministic WAV fixtures written with hound
//! - sources: in-memory `DataSource` implementations with controllable timing

#![allow(dead_code)]

pub mod audio_generator;
pub mod sources;

pub use audio_generator::{
    frame_index, generate_float_wav, generate_ramp_wav, generate_sine_wav, write_garbage, RAMP_PERIOD,
    TEST_SAMPLE_RATE,
};
pub use sources::{FailingSource, SlowSource, SlowState, VecSource};

use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
