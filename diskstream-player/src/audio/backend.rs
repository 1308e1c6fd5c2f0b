//! Audio device backends
//!
//! An `AudioBackend` owns one device stream and drives a render callback from
//! its own (real-time) thread. `CpalBackend` talks to the system audio device;
//! `NullBackend` is a software clock for headless playback and tests.

use crate::audio::format::{AudioFormatDescriptor, FormatHint, Layout, SampleType};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use diskstream_common::events::{EventBus, PlaybackEvent};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Callback size used when neither the caller nor the device fixes one
pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 512;

/// Device boundary
///
/// The render callback receives one byte slice per channel buffer (a single
/// slice for interleaved formats) and the frame count the device wants. Bytes are
/// native-endian samples laid out per the negotiated descriptor.
///
/// # Real-time contract
/// `render` runs on the device thread. It must not block, allocate, log or touch
/// the disk. Backends call it only between `play` and `pause`/`close`, and never
/// after `close` has returned. Once `render` returns `ControlFlow::Break` the
/// stream is finished: the backend stops calling it until the next `open`.
pub trait AudioBackend {
    /// Human-readable device name
    fn name(&self) -> String;

    /// Resolve the device format for `hint`; open hint fields take the device preference
    fn negotiate(&mut self, hint: &FormatHint) -> Result<AudioFormatDescriptor>;

    /// Acquire the device stream for `format` without starting it
    fn open<F>(
        &mut self,
        format: AudioFormatDescriptor,
        frames_per_buffer: Option<u32>,
        render: F,
    ) -> Result<()>
    where
        F: FnMut(&mut [&mut [u8]], usize) -> ControlFlow<()> + Send + 'static;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Release the device stream. Idempotent.
    fn close(&mut self);

    /// Route device stream errors to `events`
    fn attach_events(&mut self, _events: EventBus) {}

    /// Whether the device reported a stream error since `open`
    fn has_error(&self) -> bool {
        false
    }
}

/// Map a cpal sample format onto the supported sample types
fn sample_type_of(format: SampleFormat) -> Option<SampleType> {
    match format {
        SampleFormat::I16 => Some(SampleType::I16),
        SampleFormat::I32 => Some(SampleType::I32),
        SampleFormat::F32 => Some(SampleType::F32),
        _ => None,
    }
}

fn cpal_format_of(sample_type: SampleType) -> SampleFormat {
    match sample_type {
        SampleType::I16 => SampleFormat::I16,
        SampleType::I32 => SampleFormat::I32,
        SampleType::F32 => SampleFormat::F32,
    }
}

/// System audio device via cpal
///
/// cpal hands out one interleaved buffer per callback, so negotiation always
/// yields an interleaved layout. A `cpal::Stream` cannot be paused from its own
/// callback, so a finished render keeps the stream silent without calling back
/// into it, and `close` pauses and drops the stream.
pub struct CpalBackend {
    requested_device: Option<String>,
    device: Option<Device>,
    config: Option<StreamConfig>,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    events: Option<EventBus>,
    /// Stream error flag, set by the cpal error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    /// Set once the render callback reports the stream finished
    finished: Arc<AtomicBool>,
}

impl CpalBackend {
    /// Backend for the named output device (None = default device)
    ///
    /// The device itself is resolved on first negotiation. A named device that
    /// cannot be found falls back to the default device.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            requested_device: device_name,
            device: None,
            config: None,
            sample_format: SampleFormat::F32,
            stream: None,
            events: None,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Name of the host's default output device, if any
    pub fn default_device_name() -> Option<String> {
        cpal::default_host()
            .default_output_device()
            .and_then(|d| d.name().ok())
    }

    /// Number of stream errors reported since `open`
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Whether the render callback finished the current stream
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn resolve_device(&mut self) -> Result<&Device> {
        if self.device.is_none() {
            let host = cpal::default_host();

            let device = match self.requested_device.as_ref() {
                Some(name) => {
                    let mut devices = host.output_devices().map_err(|e| {
                        Error::AudioOutput(format!("Failed to enumerate devices: {}", e))
                    })?;

                    match devices.find(|d| d.name().ok().as_ref() == Some(name)) {
                        Some(dev) => {
                            info!("Found requested audio device: {}", name);
                            dev
                        }
                        None => {
                            warn!("Requested device '{}' not found, falling back to default device", name);
                            let dev = host.default_output_device().ok_or_else(|| {
                                Error::AudioOutput(format!(
                                    "Device '{}' not found and no default device available",
                                    name
                                ))
                            })?;
                            info!(
                                "Using default audio device as fallback: {}",
                                dev.name().unwrap_or_else(|_| "Unknown".to_string())
                            );
                            dev
                        }
                    }
                }
                None => {
                    let dev = host
                        .default_output_device()
                        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
                    info!(
                        "Using default audio device: {}",
                        dev.name().unwrap_or_else(|_| "Unknown".to_string())
                    );
                    dev
                }
            };

            self.device = Some(device);
        }

        self.device
            .as_ref()
            .ok_or_else(|| Error::AudioOutput("No output device".to_string()))
    }

    /// Pick a supported configuration for `hint`
    ///
    /// Prefers a range matching every field the hint sets, then one matching the
    /// shape (rate and channels) with any supported sample type, then the device
    /// default configuration.
    fn best_config(device: &Device, hint: &FormatHint) -> Result<(StreamConfig, SampleFormat)> {
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .collect();

        let default = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;

        let shape_matches = |range: &cpal::SupportedStreamConfigRange| {
            let rate = hint.sample_rate.unwrap_or(default.sample_rate().0);
            hint.channels.map_or(true, |c| range.channels() == c)
                && range.min_sample_rate().0 <= rate
                && range.max_sample_rate().0 >= rate
                && sample_type_of(range.sample_format()).is_some()
        };

        let exact = ranges.iter().find(|range| {
            shape_matches(*range)
                && hint
                    .sample_type
                    .map_or(true, |t| sample_type_of(range.sample_format()) == Some(t))
        });

        // Among shape-only matches, float output loses nothing
        let shaped = exact.or_else(|| {
            ranges
                .iter()
                .filter(|range| shape_matches(*range))
                .max_by_key(|range| range.sample_format() == SampleFormat::F32)
        });

        if let Some(range) = shaped {
            let rate = hint.sample_rate.unwrap_or(default.sample_rate().0);
            let sample_format = range.sample_format();
            let config = range.clone().with_sample_rate(cpal::SampleRate(rate)).config();
            return Ok((config, sample_format));
        }

        debug!("No supported range matches {:?}, using device default", hint);
        let sample_format = default.sample_format();
        if sample_type_of(sample_format).is_none() {
            return Err(Error::AudioOutput(format!(
                "Device default sample format {:?} is not supported",
                sample_format
            )));
        }
        Ok((default.config(), sample_format))
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> String {
        self.device
            .as_ref()
            .and_then(|d| d.name().ok())
            .or_else(|| self.requested_device.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    fn negotiate(&mut self, hint: &FormatHint) -> Result<AudioFormatDescriptor> {
        if hint.layout == Some(Layout::Planar) {
            debug!("cpal delivers interleaved buffers; ignoring planar layout preference");
        }

        let device = self.resolve_device()?;
        let (config, sample_format) = Self::best_config(device, hint)?;

        let sample_type = sample_type_of(sample_format).ok_or_else(|| {
            Error::AudioOutput(format!("Unsupported sample format: {:?}", sample_format))
        })?;

        let format = AudioFormatDescriptor::interleaved(config.sample_rate.0, config.channels, sample_type);

        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        self.config = Some(config);
        self.sample_format = sample_format;
        Ok(format)
    }

    fn open<F>(
        &mut self,
        format: AudioFormatDescriptor,
        frames_per_buffer: Option<u32>,
        mut render: F,
    ) -> Result<()>
    where
        F: FnMut(&mut [&mut [u8]], usize) -> ControlFlow<()> + Send + 'static,
    {
        if format.layout != Layout::Interleaved {
            return Err(Error::AudioOutput("cpal streams are interleaved only".to_string()));
        }

        let mut config = self
            .config
            .clone()
            .ok_or_else(|| Error::InvalidState("device format not negotiated".to_string()))?;

        config.sample_rate = cpal::SampleRate(format.sample_rate);
        config.channels = format.channels;
        let sample_format = cpal_format_of(format.sample_type);

        if let Some(size) = frames_per_buffer {
            config.buffer_size = cpal::BufferSize::Fixed(size);
            debug!("Using requested buffer size: {} frames", size);
        } else {
            debug!("Using device default buffer size");
        }

        self.error_flag.store(false, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);

        let channels = format.channels as usize;
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);
        let events = self.events.clone();
        let finished = Arc::clone(&self.finished);

        let device = self.resolve_device()?;
        let stream = device
            .build_output_stream_raw(
                &config,
                sample_format,
                move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                    if finished.load(Ordering::Relaxed) {
                        data.bytes_mut().fill(0);
                        return;
                    }
                    let frames = data.len() / channels;
                    let mut buffers = [data.bytes_mut()];
                    if render(&mut buffers, frames).is_break() {
                        finished.store(true, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                    if let Some(events) = events.as_ref() {
                        events.emit_lossy(PlaybackEvent::DeviceError {
                            message: err.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

        self.stream = Some(stream);
        info!("Audio stream opened ({})", format);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no audio stream open".to_string()))?;
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))
    }

    fn pause(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no audio stream open".to_string()))?;
        stream
            .pause()
            .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("Pausing stream before release failed: {}", e);
            }
            drop(stream);
            info!("Audio stream released");
        }
    }

    fn attach_events(&mut self, events: EventBus) {
        self.events = Some(events);
    }

    fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bytes delivered by a `NullBackend`, one vector per channel buffer
#[derive(Clone, Default)]
pub struct CaptureHandle {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CaptureHandle {
    /// Copy of everything captured from buffer `index` so far
    pub fn bytes(&self, index: usize) -> Vec<u8> {
        self.buffers
            .lock()
            .ok()
            .and_then(|b| b.get(index).cloned())
            .unwrap_or_default()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn reset(&self, count: usize) {
        if let Ok(mut buffers) = self.buffers.lock() {
            *buffers = vec![Vec::new(); count];
        }
    }

    fn append(&self, slices: &[&mut [u8]]) {
        if let Ok(mut buffers) = self.buffers.lock() {
            for (captured, slice) in buffers.iter_mut().zip(slices) {
                captured.extend_from_slice(slice);
            }
        }
    }
}

struct ClockShared {
    playing: AtomicBool,
    closed: AtomicBool,
    callbacks: AtomicU64,
}

/// Software clock backend
///
/// A thread calls the render callback every period (by default the real
/// duration of one buffer) into pre-allocated buffers. With a zero period it runs
/// as fast as the callback allows. The clock thread exits when the callback
/// breaks or the device closes.
pub struct NullBackend {
    fixed: Option<AudioFormatDescriptor>,
    preferred: AudioFormatDescriptor,
    period: Option<Duration>,
    capture: Option<CaptureHandle>,
    shared: Arc<ClockShared>,
    thread: Option<JoinHandle<()>>,
}

impl NullBackend {
    /// Device that only accepts `format`, whatever the hint says
    pub fn new(format: AudioFormatDescriptor) -> Self {
        let mut backend = Self::flexible();
        backend.fixed = Some(format);
        backend
    }

    /// Device that accepts any format; open hint fields default to 44.1 kHz stereo f32
    pub fn flexible() -> Self {
        Self {
            fixed: None,
            preferred: AudioFormatDescriptor::interleaved(44100, 2, SampleType::F32),
            period: None,
            capture: None,
            shared: Arc::new(ClockShared {
                playing: AtomicBool::new(false),
                closed: AtomicBool::new(true),
                callbacks: AtomicU64::new(0),
            }),
            thread: None,
        }
    }

    /// Override the callback period (`Duration::ZERO` = free running)
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Record every delivered byte
    pub fn with_capture(mut self) -> Self {
        self.capture = Some(CaptureHandle::default());
        self
    }

    pub fn capture(&self) -> Option<CaptureHandle> {
        self.capture.clone()
    }

    /// Render callbacks issued since the last `open`
    pub fn callback_count(&self) -> u64 {
        self.shared.callbacks.load(Ordering::SeqCst)
    }

    /// Counter shared with the clock thread, readable after the backend moves
    pub fn callback_counter(&self) -> CallbackCounter {
        CallbackCounter(Arc::clone(&self.shared))
    }
}

/// Read-only view of a `NullBackend`'s callback count
#[derive(Clone)]
pub struct CallbackCounter(Arc<ClockShared>);

impl CallbackCounter {
    pub fn get(&self) -> u64 {
        self.0.callbacks.load(Ordering::SeqCst)
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn negotiate(&mut self, hint: &FormatHint) -> Result<AudioFormatDescriptor> {
        let format = match self.fixed {
            Some(format) => format,
            None => hint.resolve(self.preferred),
        };
        debug!("Null device negotiated {}", format);
        Ok(format)
    }

    fn open<F>(
        &mut self,
        format: AudioFormatDescriptor,
        frames_per_buffer: Option<u32>,
        mut render: F,
    ) -> Result<()>
    where
        F: FnMut(&mut [&mut [u8]], usize) -> ControlFlow<()> + Send + 'static,
    {
        if self.thread.is_some() {
            return Err(Error::InvalidState("null device already open".to_string()));
        }

        let frames = frames_per_buffer.unwrap_or(DEFAULT_FRAMES_PER_BUFFER).max(1) as usize;
        let period = self
            .period
            .unwrap_or_else(|| format.frames_to_duration(frames as u64));

        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.closed.store(false, Ordering::SeqCst);
        self.shared.callbacks.store(0, Ordering::SeqCst);

        let capture = self.capture.clone();
        if let Some(capture) = capture.as_ref() {
            capture.reset(format.buffer_count());
        }

        let shared = Arc::clone(&self.shared);
        let mut storage: Vec<Vec<u8>> = (0..format.buffer_count())
            .map(|_| vec![0u8; format.buffer_bytes(frames)])
            .collect();

        let thread = thread::Builder::new()
            .name("diskstream-null-clock".to_string())
            .spawn(move || {
                let mut slices: Vec<&mut [u8]> = storage.iter_mut().map(|b| b.as_mut_slice()).collect();
                let mut next_tick = Instant::now();

                while !shared.closed.load(Ordering::SeqCst) {
                    if !shared.playing.load(Ordering::SeqCst) {
                        thread::park_timeout(Duration::from_millis(2));
                        next_tick = Instant::now();
                        continue;
                    }

                    for slice in slices.iter_mut() {
                        slice.fill(0);
                    }
                    let flow = render(&mut slices, frames);
                    shared.callbacks.fetch_add(1, Ordering::SeqCst);

                    if let Some(capture) = capture.as_ref() {
                        capture.append(&slices);
                    }

                    if flow.is_break() {
                        shared.playing.store(false, Ordering::SeqCst);
                        break;
                    }

                    if period.is_zero() {
                        thread::yield_now();
                    } else {
                        next_tick += period;
                        let now = Instant::now();
                        if next_tick > now {
                            thread::park_timeout(next_tick - now);
                        } else {
                            next_tick = now;
                        }
                    }
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to start null clock: {}", e)))?;

        self.thread = Some(thread);
        debug!("Null device opened: {} frames every {:?}", frames, period);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let thread = self
            .thread
            .as_ref()
            .ok_or_else(|| Error::InvalidState("null device not open".to_string()))?;
        self.shared.playing.store(true, Ordering::SeqCst);
        thread.thread().unpark();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.thread.is_none() {
            return Err(Error::InvalidState("null device not open".to_string()));
        }
        self.shared.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("Null clock thread panicked");
            }
            debug!("Null device closed");
        }
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.close();
    }
}
