//! Playback-related type definitions

use serde::{Deserialize, Serialize};

/// Output lifecycle state
///
/// `Idle -> Configured -> Running <-> Paused -> Stopped`. `Stopped` is terminal for
/// a session; a new session starts again from `configure`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    /// No format negotiated yet
    Idle,
    /// Device format negotiated, callback loop not started
    Configured,
    /// Callback loop running
    Running,
    /// Callback loop suspended, device still held
    Paused,
    /// Callback loop halted (stopped by owner or end of track)
    Stopped,
}

impl std::fmt::Display for OutputState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputState::Idle => write!(f, "idle"),
            OutputState::Configured => write!(f, "configured"),
            OutputState::Running => write!(f, "running"),
            OutputState::Paused => write!(f, "paused"),
            OutputState::Stopped => write!(f, "stopped"),
        }
    }
}
