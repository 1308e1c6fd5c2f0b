//! Pull-based audio output
//!
//! Owns an `AudioBackend`, negotiates the device format, and on each device
//! callback asks a `DataSource` to fill the device buffers.
//!
//! State machine: `Idle -> Configured -> Running <-> Paused -> Stopped`. A call
//! whose target state is already current is a no-op; any other out-of-order call
//! fails with `InvalidState` and leaves the state unchanged.
//!
//! The render callback never blocks: it enters the session gate, `try_lock`s the
//! source (contention renders silence), and reports end of track through a
//! bounded channel that a relay thread turns into events. At end of track the
//! callback tells the backend to stop calling back, so `Stopped` always means
//! the loop has halted.

use crate::audio::backend::AudioBackend;
use crate::audio::buffer::{BufferRequest, DataSource};
use crate::audio::format::{AudioFormatDescriptor, FormatHint};
use crate::audio::gate::SessionGate;
use crate::error::{Error, Result};
use diskstream_common::events::{EventBus, OutputState, PlaybackEvent};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Slots in the callback -> relay channel; the callback sends at most one signal per session
const SIGNAL_CAPACITY: usize = 4;

/// Callback counters since the last `start`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    /// Device callbacks received
    pub callbacks: u64,
    /// Frames the data source produced
    pub frames_delivered: u64,
    /// Frames padded with silence (short reads, pauses, contention)
    pub silent_frames: u64,
    /// Callbacks that found the source locked by the control context
    pub contended: u64,
}

#[derive(Default)]
struct StatsCounters {
    callbacks: AtomicU64,
    frames_delivered: AtomicU64,
    silent_frames: AtomicU64,
    contended: AtomicU64,
}

impl StatsCounters {
    fn reset(&self) {
        self.callbacks.store(0, Ordering::Relaxed);
        self.frames_delivered.store(0, Ordering::Relaxed);
        self.silent_frames.store(0, Ordering::Relaxed);
        self.contended.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OutputStats {
        OutputStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            silent_frames: self.silent_frames.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }
}

/// Real-time to control context notifications
enum RenderSignal {
    EndOfTrack,
    SourceFailed,
    /// A control-context panic poisoned the source lock
    SourcePoisoned,
    Shutdown,
}

/// One start..stop span of the callback loop
struct PlaybackSession {
    id: Uuid,
    gate: Arc<SessionGate>,
    signals: SyncSender<RenderSignal>,
    relay: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Close the gate, release the device, then wait out any in-flight callback
    fn teardown<B: AudioBackend>(mut self, backend: &mut B) {
        self.gate.close();
        backend.close();
        self.gate.wait_idle();

        let _ = self.signals.send(RenderSignal::Shutdown);
        if let Some(relay) = self.relay.take() {
            if relay.join().is_err() {
                warn!("Event relay thread panicked");
            }
        }
        debug!("Session {} torn down", self.id);
    }
}

/// Audio output driving a data source from a device callback
pub struct Output<B: AudioBackend> {
    backend: B,
    events: EventBus,
    state: OutputState,
    format: Option<AudioFormatDescriptor>,
    frames_per_buffer: Option<u32>,
    session: Option<PlaybackSession>,
    stats: Arc<StatsCounters>,
}

impl<B: AudioBackend> Output<B> {
    pub fn new(mut backend: B, events: EventBus) -> Self {
        backend.attach_events(events.clone());
        Self {
            backend,
            events,
            state: OutputState::Idle,
            format: None,
            frames_per_buffer: None,
            session: None,
            stats: Arc::new(StatsCounters::default()),
        }
    }

    /// Ask the device for a fixed callback size (None = device default)
    pub fn with_frames_per_buffer(mut self, frames: Option<u32>) -> Self {
        self.frames_per_buffer = frames;
        self
    }

    pub fn set_frames_per_buffer(&mut self, frames: Option<u32>) {
        self.frames_per_buffer = frames;
    }

    /// Negotiate the device format for `hint`
    ///
    /// Valid from `Idle` or `Stopped`; moves to `Configured`.
    pub fn configure(&mut self, hint: FormatHint) -> Result<AudioFormatDescriptor> {
        let current = self.state();
        if !matches!(current, OutputState::Idle | OutputState::Stopped) {
            return Err(Error::InvalidState(format!("cannot configure while {}", current)));
        }

        // A session that ended on its own still holds the device
        self.release_session();

        let format = self.backend.negotiate(&hint)?;
        info!("Output configured on {}: {}", self.backend.name(), format);

        self.format = Some(format);
        self.set_state(OutputState::Configured);
        Ok(format)
    }

    /// Start pulling from `source`
    ///
    /// Valid from `Configured`. The source must already produce the negotiated
    /// format, otherwise `FormatMismatch` is returned before any callback runs.
    /// On any failure the device is released before returning.
    pub fn start<S>(&mut self, source: Arc<Mutex<S>>) -> Result<()>
    where
        S: DataSource + 'static,
    {
        if self.state != OutputState::Configured {
            return Err(Error::InvalidState(format!("cannot start while {}", self.state())));
        }
        let format = self
            .format
            .ok_or_else(|| Error::InvalidState("no negotiated format".to_string()))?;

        let source_format = source
            .lock()
            .map_err(|_| Error::InvalidState("data source lock poisoned".to_string()))?
            .format();
        if source_format != format {
            return Err(Error::FormatMismatch {
                expected: format,
                actual: source_format,
            });
        }

        let session_id = Uuid::new_v4();
        let gate = Arc::new(SessionGate::new());
        let (signals, receiver) = mpsc::sync_channel(SIGNAL_CAPACITY);

        let relay = spawn_relay(session_id, receiver, Arc::clone(&source), self.events.clone())?;
        let session = PlaybackSession {
            id: session_id,
            gate: Arc::clone(&gate),
            signals: signals.clone(),
            relay: Some(relay),
        };

        self.stats.reset();
        let render = render_callback(format, gate, source, signals, Arc::clone(&self.stats));

        let started = self
            .backend
            .open(format, self.frames_per_buffer, render)
            .and_then(|()| self.backend.play());

        if let Err(e) = started {
            warn!("Failed to start output: {}", e);
            session.teardown(&mut self.backend);
            return Err(e);
        }

        self.session = Some(session);
        self.set_state(OutputState::Running);
        info!("Playback session {} started ({})", session_id, format);
        Ok(())
    }

    /// Suspend the callback loop, keeping the device
    pub fn pause(&mut self) -> Result<()> {
        match self.state() {
            OutputState::Paused => Ok(()),
            OutputState::Running => {
                let session = self
                    .session
                    .as_ref()
                    .ok_or_else(|| Error::InvalidState("no playback session".to_string()))?;
                if !session.gate.pause() {
                    return Err(Error::InvalidState("track already ended".to_string()));
                }
                if let Err(e) = self.backend.pause() {
                    session.gate.resume();
                    return Err(e);
                }
                self.set_state(OutputState::Paused);
                Ok(())
            }
            other => Err(Error::InvalidState(format!("cannot pause while {}", other))),
        }
    }

    /// Resume a paused callback loop
    pub fn resume(&mut self) -> Result<()> {
        match self.state() {
            OutputState::Running => Ok(()),
            OutputState::Paused => {
                let session = self
                    .session
                    .as_ref()
                    .ok_or_else(|| Error::InvalidState("no playback session".to_string()))?;
                self.backend.play()?;
                if !session.gate.resume() {
                    return Err(Error::InvalidState("session closed".to_string()));
                }
                self.set_state(OutputState::Running);
                Ok(())
            }
            other => Err(Error::InvalidState(format!("cannot resume while {}", other))),
        }
    }

    /// Halt the loop and release the device
    ///
    /// When this returns, no callback is running inside the data source and none
    /// will start, so the source may be closed. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        match self.state() {
            OutputState::Idle | OutputState::Stopped => {}
            _ => {
                self.set_state(OutputState::Stopped);
                info!("Output stopped");
            }
        }
        self.release_session();
        Ok(())
    }

    /// Current state; a session whose track ended reports `Stopped`
    pub fn state(&self) -> OutputState {
        match (&self.session, self.state) {
            (Some(session), OutputState::Running | OutputState::Paused) if session.gate.is_ended() => {
                OutputState::Stopped
            }
            (_, state) => state,
        }
    }

    /// Negotiated device format, once configured
    pub fn format(&self) -> Option<AudioFormatDescriptor> {
        self.format
    }

    /// Id of the live playback session
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn stats(&self) -> OutputStats {
        self.stats.snapshot()
    }

    pub fn has_device_error(&self) -> bool {
        self.backend.has_error()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Tear down the live session, if any; an ended session leaves `Stopped` behind
    fn release_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown(&mut self.backend);
            if matches!(self.state, OutputState::Running | OutputState::Paused) {
                self.state = OutputState::Stopped;
            }
        }
    }

    fn set_state(&mut self, new_state: OutputState) {
        let old_state = self.state();
        self.state = new_state;
        if old_state != new_state {
            debug!("Output state {} -> {}", old_state, new_state);
            self.events.emit_lossy(PlaybackEvent::StateChanged {
                session_id: self.session.as_ref().map(|s| s.id),
                old_state,
                new_state,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

impl<B: AudioBackend> Drop for Output<B> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Build the device callback for one session
///
/// Breaks once the session has ended, so the backend stops calling back.
fn render_callback<S>(
    format: AudioFormatDescriptor,
    gate: Arc<SessionGate>,
    source: Arc<Mutex<S>>,
    signals: SyncSender<RenderSignal>,
    stats: Arc<StatsCounters>,
) -> impl FnMut(&mut [&mut [u8]], usize) -> ControlFlow<()> + Send + 'static
where
    S: DataSource + 'static,
{
    move |buffers: &mut [&mut [u8]], frames: usize| {
        stats.callbacks.fetch_add(1, Ordering::Relaxed);

        let Some(_guard) = gate.enter() else {
            silence(buffers, &stats, frames);
            return if gate.is_ended() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            };
        };

        let mut source = match source.try_lock() {
            Ok(source) => source,
            Err(TryLockError::WouldBlock) => {
                stats.contended.fetch_add(1, Ordering::Relaxed);
                silence(buffers, &stats, frames);
                return ControlFlow::Continue(());
            }
            Err(TryLockError::Poisoned(_)) => {
                silence(buffers, &stats, frames);
                if gate.end() {
                    let _ = signals.try_send(RenderSignal::SourcePoisoned);
                }
                return ControlFlow::Break(());
            }
        };

        let filled = match BufferRequest::new(format, frames, &mut *buffers) {
            Ok(mut request) => {
                let result = source.read_frames(&mut request);
                let written = result.frames.min(frames);
                if written < frames {
                    request.fill_silence(written);
                    stats.silent_frames.fetch_add((frames - written) as u64, Ordering::Relaxed);
                }
                stats.frames_delivered.fetch_add(written as u64, Ordering::Relaxed);
                Some(result)
            }
            Err(_) => None,
        };

        // Device buffers that do not fit the negotiated format are never handed out
        let Some(result) = filled else {
            silence(buffers, &stats, frames);
            return ControlFlow::Continue(());
        };

        if result.end_of_stream && result.frames == 0 && gate.end() {
            let signal = if source.has_failed() {
                RenderSignal::SourceFailed
            } else {
                RenderSignal::EndOfTrack
            };
            let _ = signals.try_send(signal);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

fn silence(buffers: &mut [&mut [u8]], stats: &StatsCounters, frames: usize) {
    for buffer in buffers.iter_mut() {
        buffer.fill(0);
    }
    stats.silent_frames.fetch_add(frames as u64, Ordering::Relaxed);
}

/// Relay render signals onto the event bus from a non-real-time thread
fn spawn_relay<S>(
    session_id: Uuid,
    receiver: Receiver<RenderSignal>,
    source: Arc<Mutex<S>>,
    events: EventBus,
) -> Result<JoinHandle<()>>
where
    S: DataSource + 'static,
{
    thread::Builder::new()
        .name("diskstream-relay".to_string())
        .spawn(move || {
            while let Ok(signal) = receiver.recv() {
                match signal {
                    RenderSignal::Shutdown => break,
                    RenderSignal::SourceFailed => {
                        let message = source
                            .lock()
                            .ok()
                            .and_then(|s| s.failure_message())
                            .unwrap_or_else(|| "data source failed".to_string());
                        source_error(session_id, message, &events);
                    }
                    RenderSignal::SourcePoisoned => {
                        source_error(session_id, "data source lock poisoned".to_string(), &events);
                    }
                    RenderSignal::EndOfTrack => {
                        info!("Session {} reached end of track", session_id);
                        end_of_track(session_id, &events);
                    }
                }
            }
        })
        .map_err(|e| Error::AudioOutput(format!("Failed to start event relay: {}", e)))
}

fn source_error(session_id: Uuid, message: String, events: &EventBus) {
    warn!("Session {} source failed: {}", session_id, message);
    events.emit_lossy(PlaybackEvent::SourceError {
        session_id,
        message,
        timestamp: chrono::Utc::now(),
    });
    end_of_track(session_id, events);
}

fn end_of_track(session_id: Uuid, events: &EventBus) {
    events.emit_lossy(PlaybackEvent::StateChanged {
        session_id: Some(session_id),
        old_state: OutputState::Running,
        new_state: OutputState::Stopped,
        timestamp: chrono::Utc::now(),
    });
    events.emit_lossy(PlaybackEvent::EndOfTrack {
        session_id,
        timestamp: chrono::Utc::now(),
    });
}
