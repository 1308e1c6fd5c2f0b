//! Playback control surface
//!
//! Glue over `FrameSource` and `Output`: selecting a track opens it and
//! negotiates the device format, `play`/`pause`/`stop` drive the output state
//! machine, and end-of-track arrives through the event bus.

use crate::audio::backend::AudioBackend;
use crate::audio::format::{AudioFormatDescriptor, FormatHint};
use crate::audio::frame_source::{FrameSource, PositionProbe, TrackHandle};
use crate::audio::library::{FolderLibrary, MediaLibrary, TrackId};
use crate::audio::output::{Output, OutputStats};
use crate::error::{Error, Result};
use diskstream_common::events::{EventBus, OutputState, PlaybackEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// The currently selected track
struct Selection {
    track_id: TrackId,
    handle: Arc<Mutex<TrackHandle>>,
    probe: PositionProbe,
    format: AudioFormatDescriptor,
}

pub struct PlaybackController<B: AudioBackend, L: MediaLibrary = FolderLibrary> {
    source: FrameSource<L>,
    output: Output<B>,
    events: EventBus,
    hint: FormatHint,
    selection: Option<Selection>,
}

impl<B: AudioBackend, L: MediaLibrary> PlaybackController<B, L> {
    pub fn new(source: FrameSource<L>, backend: B, events: EventBus) -> Self {
        Self {
            source,
            output: Output::new(backend, events.clone()),
            events,
            hint: FormatHint::default(),
            selection: None,
        }
    }

    /// Device format preferences; open fields follow the selected track
    pub fn with_format_hint(mut self, hint: FormatHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_frames_per_buffer(mut self, frames: Option<u32>) -> Self {
        self.output.set_frames_per_buffer(frames);
        self
    }

    /// Open `track_id` and negotiate the device format for it
    ///
    /// Stops and releases whatever was selected before. The decode target is set
    /// to the negotiated format; a device that cannot run at the track's rate or
    /// channel count yields `FormatMismatch`.
    pub fn select_track(&mut self, track_id: &TrackId) -> Result<AudioFormatDescriptor> {
        self.stop()?;

        let mut handle = self.source.open(track_id)?;
        let native = handle.native_format();

        let hint = FormatHint {
            sample_rate: self.hint.sample_rate.or(Some(native.sample_rate)),
            channels: self.hint.channels.or(Some(native.channels)),
            sample_type: self.hint.sample_type.or(Some(native.sample_type)),
            layout: self.hint.layout,
        };

        let format = self.output.configure(hint)?;
        if let Err(e) = handle.set_output_format(format) {
            self.output.stop()?;
            return Err(e);
        }

        info!("Selected track {} ({})", track_id, format);
        self.events.emit_lossy(PlaybackEvent::TrackSelected {
            track_id: track_id.to_string(),
            sample_rate: format.sample_rate,
            channels: format.channels,
            total_frames: handle.total_frames(),
            timestamp: chrono::Utc::now(),
        });

        self.selection = Some(Selection {
            track_id: track_id.clone(),
            probe: handle.position_probe(),
            handle: Arc::new(Mutex::new(handle)),
            format,
        });
        Ok(format)
    }

    /// Start or resume playback of the selected track
    ///
    /// After the track has ended, playing again starts from the beginning (or
    /// from wherever a `seek` since then left the cursor).
    pub fn play(&mut self) -> Result<()> {
        match self.output.state() {
            OutputState::Running => Ok(()),
            OutputState::Paused => self.output.resume(),
            OutputState::Configured => {
                let handle = Arc::clone(&self.selected()?.handle);
                self.output.start(handle)
            }
            OutputState::Stopped => {
                let selection = self.selected()?;
                let (handle, format) = (Arc::clone(&selection.handle), selection.format);
                {
                    let mut track = lock(&handle)?;
                    if track.is_end_of_stream() {
                        track.seek(0)?;
                    }
                }
                self.output.configure(FormatHint::exact(format))?;
                self.output.start(handle)
            }
            OutputState::Idle => Err(Error::InvalidState("no track selected".to_string())),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.output.pause()
    }

    /// Pause when running, play otherwise
    pub fn toggle(&mut self) -> Result<()> {
        if self.output.state() == OutputState::Running {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Stop playback and release the device and the selected track
    pub fn stop(&mut self) -> Result<()> {
        self.output.stop()?;
        if let Some(selection) = self.selection.take() {
            lock(&selection.handle)?.close();
            debug!("Released track {}", selection.track_id);
        }
        Ok(())
    }

    /// Move the selected track's cursor to `position`
    ///
    /// While running, the callback may render one buffer of silence while the
    /// seek holds the track.
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        let frame = self.selected()?.format.duration_to_frames(position);
        self.seek_frames(frame)
    }

    pub fn seek_frames(&mut self, frame: u64) -> Result<()> {
        let selection = self.selected()?;
        lock(&selection.handle)?.seek(frame)?;
        info!("Seeked {} to frame {}", selection.track_id, frame);
        Ok(())
    }

    /// Playback position of the selected track
    pub fn position(&self) -> Option<Duration> {
        self.selection.as_ref().map(|s| s.probe.elapsed())
    }

    pub fn position_frames(&self) -> Option<u64> {
        self.selection.as_ref().map(|s| s.probe.frames())
    }

    /// Length of the selected track, when known
    pub fn duration(&self) -> Option<Duration> {
        let selection = self.selection.as_ref()?;
        let handle = selection.handle.lock().ok()?;
        handle.duration()
    }

    pub fn state(&self) -> OutputState {
        self.output.state()
    }

    pub fn current_track(&self) -> Option<&TrackId> {
        self.selection.as_ref().map(|s| &s.track_id)
    }

    pub fn format(&self) -> Option<AudioFormatDescriptor> {
        self.selection.as_ref().map(|s| s.format)
    }

    pub fn stats(&self) -> OutputStats {
        self.output.stats()
    }

    /// Register a handler run (on the event relay thread) whenever a track ends
    pub fn on_end_of_track<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_end_of_track(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn output(&self) -> &Output<B> {
        &self.output
    }

    fn selected(&self) -> Result<&Selection> {
        self.selection
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no track selected".to_string()))
    }
}

fn lock(handle: &Mutex<TrackHandle>) -> Result<MutexGuard<'_, TrackHandle>> {
    handle
        .lock()
        .map_err(|_| Error::InvalidState("track handle lock poisoned".to_string()))
}
