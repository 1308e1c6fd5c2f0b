//! Event types for the diskstream event system
//!
//! Provides the playback event definitions and the EventBus used to deliver them
//! from the output layer to its owner.

mod playback_types;

pub use playback_types::OutputState;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Playback events
///
/// Events are broadcast via EventBus and can be serialized (one JSON object per
/// line) for external consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PlaybackEvent {
    /// A track was opened and its decode target negotiated
    TrackSelected {
        /// Library identifier of the track
        track_id: String,
        /// Negotiated sample rate
        sample_rate: u32,
        /// Negotiated channel count
        channels: u16,
        /// Track length in frames, when the container declares it
        total_frames: Option<u64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Output state changed
    StateChanged {
        /// Playback session this change belongs to (None before a session exists)
        session_id: Option<Uuid>,
        old_state: OutputState,
        new_state: OutputState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The data source reported end-of-stream with no frames; the loop halted
    EndOfTrack {
        session_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The data source failed mid-track; playback halted fail-soft
    SourceError {
        session_id: Uuid,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The audio device reported a stream error
    DeviceError {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlaybackEvent {
    /// Serialize as a single JSON line
    pub fn to_json_line(&self) -> String {
        // Serializing this enum cannot fail: every field is a plain value.
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"type\":\"Invalid\",\"error\":\"{}\"}}", e))
    }
}

type EndOfTrackHandler = Arc<dyn Fn() + Send + Sync>;

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// Additionally holds the owner's end-of-track handlers, invoked synchronously on
/// the emitting thread whenever an `EndOfTrack` event is emitted. Emission only
/// ever happens from control-context threads, never from the audio callback.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlaybackEvent>,
    capacity: usize,
    end_of_track: Arc<Mutex<Vec<EndOfTrackHandler>>>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            capacity,
            end_of_track: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }

    /// Register a handler called each time a track reaches its end
    pub fn on_end_of_track<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.end_of_track.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlaybackEvent) {
        let is_end_of_track = matches!(event, PlaybackEvent::EndOfTrack { .. });
        let _ = self.tx.send(event);

        if is_end_of_track {
            // Clone out so a handler may register further handlers without deadlock
            let handlers: Vec<EndOfTrackHandler> = match self.end_of_track.lock() {
                Ok(handlers) => handlers.clone(),
                Err(_) => return,
            };
            for handler in handlers {
                handler();
            }
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
