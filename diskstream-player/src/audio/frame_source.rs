//! Disk-backed frame source using symphonia
//!
//! Opens one library track and decodes it packet by packet, straight into the
//! buffers supplied by the caller. Peak memory is one decoded packet, never the
//! whole track.
//!
//! The conversion scratch (one packet of samples in the target sample type) is
//! allocated when the track is opened or its target format changes. It only
//! grows on the read path if a packet exceeds the codec-declared maximum.

use crate::audio::buffer::{BufferRequest, DataSource, FillResult};
use crate::audio::format::{AudioFormatDescriptor, SampleType};
use crate::audio::library::{FolderLibrary, MediaLibrary, TrackId};
use crate::error::{Error, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::{AudioBufferRef, Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE,
};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, info, warn};

/// Scratch size when the codec does not declare a maximum packet length
const DEFAULT_PACKET_FRAMES: u64 = 8192;

/// Consecutive corrupt packets skipped before the stream is declared failed
const MAX_DECODE_RETRIES: usize = 3;

/// Opens library tracks for streaming
pub struct FrameSource<L: MediaLibrary = FolderLibrary> {
    library: L,
}

impl<L: MediaLibrary> FrameSource<L> {
    pub fn new(library: L) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    /// Resolve `track_id` and open a decode session positioned at frame 0
    ///
    /// # Errors
    /// - `AssetNotFound`: identifier does not resolve
    /// - `UnsupportedFormat`: container or codec cannot be decoded
    /// - `Io`: storage failure
    pub fn open(&self, track_id: &TrackId) -> Result<TrackHandle> {
        let path = self.library.resolve(track_id)?;
        TrackHandle::open(track_id.clone(), path)
    }
}

/// Lock-free view of a handle's cursor for the control context
#[derive(Debug, Clone)]
pub struct PositionProbe {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl PositionProbe {
    /// Frames delivered since the start of the track
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Playback time corresponding to `frames()`
    pub fn elapsed(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Why a stream ended early. Kept unformatted so recording it never allocates.
#[derive(Debug)]
enum Failure {
    Decode(SymphoniaError),
    Layout {
        expected: AudioFormatDescriptor,
        actual: AudioFormatDescriptor,
    },
    /// Storage ended before the length the container declared
    Truncated { reached: u64, declared: u64 },
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Failure::Decode(SymphoniaError::IoError(e)) => Error::Io(e),
            Failure::Decode(e) => Error::Decode(e.to_string()),
            Failure::Layout { expected, actual } => Error::FormatMismatch { expected, actual },
            failure @ Failure::Truncated { .. } => {
                Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, failure.message()))
            }
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::Decode(e) => e.to_string(),
            Failure::Layout { expected, actual } => {
                format!("request layout {} does not match source {}", actual, expected)
            }
            Failure::Truncated { reached, declared } => {
                format!("track truncated at frame {} of {}", reached, declared)
            }
        }
    }
}

/// An opened track: decode session plus read cursor
///
/// Reads are sequential. The cursor only moves forward on reads, by exactly the
/// frames produced, and otherwise only through `seek`.
pub struct TrackHandle {
    track_id: TrackId,
    path: PathBuf,
    session: Option<DecodeSession>,
    native: AudioFormatDescriptor,
    format: AudioFormatDescriptor,
    channel_layout: Channels,
    total_frames: Option<u64>,
    cursor: u64,
    frames_seen: u64,
    position: Arc<AtomicU64>,
    end_of_stream: bool,
    failure: Option<Failure>,
}

impl TrackHandle {
    /// Open the file at `path` directly, bypassing library resolution
    pub fn open(track_id: TrackId, path: PathBuf) -> Result<Self> {
        let (session, info) = DecodeSession::open(&path, None)?;

        let native = AudioFormatDescriptor::interleaved(
            info.sample_rate,
            info.channels.count() as u16,
            info.native_type,
        );

        info!(
            "Opened track {} ({}), {} frames",
            track_id,
            native,
            info.total_frames
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self {
            track_id,
            path,
            session: Some(session),
            native,
            format: native,
            channel_layout: info.channels,
            total_frames: info.total_frames,
            cursor: 0,
            frames_seen: 0,
            position: Arc::new(AtomicU64::new(0)),
            end_of_stream: false,
            failure: None,
        })
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the asset decodes to without conversion
    pub fn native_format(&self) -> AudioFormatDescriptor {
        self.native
    }

    /// Format `read_frames` currently writes
    pub fn format(&self) -> AudioFormatDescriptor {
        self.format
    }

    /// Frames delivered so far
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Track length in frames, when the container declares it
    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn duration(&self) -> Option<Duration> {
        self.total_frames.map(|frames| self.native.frames_to_duration(frames))
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    pub fn position_probe(&self) -> PositionProbe {
        PositionProbe {
            frames: Arc::clone(&self.position),
            sample_rate: self.native.sample_rate,
        }
    }

    /// Set the layout `read_frames` writes in
    ///
    /// Sample type and interleaved/planar layout are converted. Sample rate and
    /// channel count must match the asset: there is no resampling or remixing.
    pub fn set_output_format(&mut self, format: AudioFormatDescriptor) -> Result<()> {
        if !format.same_stream_shape(&self.native) {
            return Err(Error::FormatMismatch {
                expected: format,
                actual: self.native,
            });
        }

        if format.sample_type != self.format.sample_type {
            if let Some(session) = self.session.as_mut() {
                session.convert_scratch(format.sample_type, self.channel_layout, self.native.sample_rate);
            }
        }

        debug!("Track {} decode target set to {}", self.track_id, format);
        self.format = format;
        Ok(())
    }

    /// Decode up to `request.frames()` frames into the request's buffers
    ///
    /// Returns fewer frames only when the stream ends (or fails) during this call,
    /// in which case end-of-stream is asserted in the same result. A failure is
    /// recorded for `take_failure` and ends the stream; frames written before it
    /// are still reported and counted.
    pub fn read_frames<B: AsMut<[u8]>>(&mut self, request: &mut BufferRequest<'_, B>) -> FillResult {
        if self.end_of_stream {
            return FillResult::end(0);
        }

        let Some(session) = self.session.as_mut() else {
            self.end_of_stream = true;
            return FillResult::end(0);
        };

        if *request.format() != self.format {
            self.failure = Some(Failure::Layout {
                expected: self.format,
                actual: *request.format(),
            });
            self.end_of_stream = true;
            return FillResult::end(0);
        }

        let requested = request.frames();
        let channels = self.native.channels as usize;
        let mut written = 0;

        while written < requested {
            if session.pending.is_empty() {
                match session.decode_next() {
                    Ok(true) => continue,
                    Ok(false) => {
                        let reached = self.cursor + written as u64;
                        if let Some(declared) = self.total_frames.filter(|&declared| reached < declared) {
                            if session.hit_eof {
                                self.failure = Some(Failure::Truncated { reached, declared });
                            }
                        }
                        self.end_of_stream = true;
                        break;
                    }
                    Err(err) => {
                        self.failure = Some(Failure::Decode(err));
                        self.end_of_stream = true;
                        break;
                    }
                }
            }

            let take = session.pending.len().min(requested - written);
            let range = session.pending.start..session.pending.start + take;
            let copied = session.scratch.write_into(request, written, range, channels);
            session.pending.start += copied;
            written += copied;

            if copied == 0 {
                // Scratch holds fewer samples than pending claims; drop the rest
                session.pending = 0..0;
            }
        }

        self.cursor += written as u64;
        self.frames_seen = self.frames_seen.max(self.cursor);
        self.position.store(self.cursor, Ordering::Relaxed);

        FillResult {
            frames: written,
            end_of_stream: self.end_of_stream,
        }
    }

    /// Reposition the cursor to `frame`
    ///
    /// `seek(0)` reopens the decode session, so what follows is identical to a
    /// fresh open. Other targets use an accurate container seek and then decode
    /// and discard up to the exact frame; containers that cannot seek fall back
    /// to decoding from the start. Clears end-of-stream and any recorded failure.
    ///
    /// # Errors
    /// - `SeekOutOfRange`: `frame` is beyond the track length
    /// - `InvalidState`: the handle is closed
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(Error::InvalidState(format!(
                "track {} is closed",
                self.track_id
            )));
        };

        if let Some(total) = self.total_frames {
            if frame > total {
                return Err(Error::SeekOutOfRange {
                    requested: frame,
                    length: total,
                });
            }
        }

        if frame == 0 {
            self.reopen_at(0)?;
        } else if self.total_frames == Some(frame) {
            // Nothing left to decode; the next seek repositions the reader
            self.cursor = frame;
            self.position.store(frame, Ordering::Relaxed);
            self.end_of_stream = true;
            self.failure = None;
            return Ok(());
        } else {
            match session.seek_accurate(frame, self.native.sample_rate) {
                Ok(()) => {}
                Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                    // Reader position is unspecified after a failed seek
                    let length = self.frames_seen;
                    self.reopen_at(self.cursor)?;
                    return Err(Error::SeekOutOfRange {
                        requested: frame,
                        length,
                    });
                }
                Err(err) => {
                    debug!(
                        "Container seek failed for {} ({}), decoding from start",
                        self.track_id, err
                    );
                    self.reopen_at(frame)?;
                }
            }
        }

        self.cursor = frame;
        self.position.store(frame, Ordering::Relaxed);
        self.end_of_stream = false;
        self.failure = None;

        debug!("Track {} positioned at frame {}", self.track_id, frame);
        Ok(())
    }

    /// Release the decode session. Idempotent; later reads report end-of-stream.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("Closed track {}", self.track_id);
        }
        self.end_of_stream = true;
    }

    /// Take the failure that ended the stream, if any
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take().map(Failure::into_error)
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Replace the session with a fresh one positioned at `frame`
    fn reopen_at(&mut self, frame: u64) -> Result<()> {
        let (mut session, _) = DecodeSession::open(&self.path, Some(self.format.sample_type))?;
        session.skip = frame;
        session.drain_skip().map_err(|e| match e {
            SymphoniaError::IoError(e) => Error::Io(e),
            other => Error::Decode(other.to_string()),
        })?;
        self.session = Some(session);
        Ok(())
    }
}

impl DataSource for TrackHandle {
    fn format(&self) -> AudioFormatDescriptor {
        self.format
    }

    fn read_frames<B: AsMut<[u8]>>(&mut self, request: &mut BufferRequest<'_, B>) -> FillResult {
        TrackHandle::read_frames(self, request)
    }

    fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    fn failure_message(&self) -> Option<String> {
        self.failure.as_ref().map(Failure::message)
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream properties discovered while opening
struct StreamInfo {
    sample_rate: u32,
    channels: Channels,
    total_frames: Option<u64>,
    native_type: SampleType,
}

/// Symphonia reader + decoder + one packet of converted samples
struct DecodeSession {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track: u32,
    time_base: Option<TimeBase>,
    channels: usize,
    scratch: DecodeScratch,
    /// Frames of the current packet not yet delivered
    pending: Range<usize>,
    /// Frames still to discard after a seek
    skip: u64,
    decode_errors: usize,
    /// The reader ran out of bytes (as opposed to a stream reset)
    hit_eof: bool,
}

impl DecodeSession {
    /// Probe `path` and create a decoder; scratch uses `sample_type` or the native one
    fn open(path: &Path, sample_type: Option<SampleType>) -> Result<(Self, StreamInfo)> {
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::AssetNotFound(format!("{} disappeared: {}", path.display(), e))
            }
            _ => Error::Io(e),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| open_error(path, e))?;

        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("{}: no audio track found", path.display()))
            })?;

        let params = &track.codec_params;
        let sample_rate = params.sample_rate.ok_or_else(|| {
            Error::UnsupportedFormat(format!("{}: sample rate not declared", path.display()))
        })?;
        let channels = params.channels.ok_or_else(|| {
            Error::UnsupportedFormat(format!("{}: channel layout not declared", path.display()))
        })?;

        let native_type = native_sample_type(params);

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| open_error(path, e))?;

        let packet_frames = params.max_frames_per_packet.unwrap_or(DEFAULT_PACKET_FRAMES);
        let scratch = DecodeScratch::new(
            sample_type.unwrap_or(native_type),
            packet_frames,
            SignalSpec::new(sample_rate, channels),
        );

        let info = StreamInfo {
            sample_rate,
            channels,
            total_frames: params.n_frames,
            native_type,
        };

        debug!(
            "Decode session for {}: codec={:?}, scratch={} frames",
            path.display(),
            params.codec,
            packet_frames
        );

        let session = Self {
            track: track.id,
            time_base: params.time_base,
            channels: channels.count(),
            reader,
            decoder,
            scratch,
            pending: 0..0,
            skip: 0,
            decode_errors: 0,
            hit_eof: false,
        };

        Ok((session, info))
    }

    /// Decode the next packet of our track into the scratch
    ///
    /// Returns `Ok(false)` at end of stream; `hit_eof` tells a short file from a
    /// chained stream. Individually corrupt packets are
    /// skipped, up to `MAX_DECODE_RETRIES` in a row.
    fn decode_next(&mut self) -> std::result::Result<bool, SymphoniaError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.hit_eof = true;
                    return Ok(false);
                }
                // A chained stream begins; this session only plays the first one
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e),
            };

            if packet.track_id() != self.track {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.spec().channels.count() != self.channels {
                        return Err(SymphoniaError::Unsupported("channel count changed mid-stream"));
                    }
                    self.decode_errors = 0;

                    let frames = decoded.frames();
                    self.scratch.load(decoded);

                    let skipped = self.skip.min(frames as u64) as usize;
                    self.skip -= skipped as u64;
                    self.pending = skipped..frames;
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(_)) if self.decode_errors < MAX_DECODE_RETRIES => {
                    self.decode_errors += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Decode and discard until `skip` frames have been dropped (or the stream ends)
    fn drain_skip(&mut self) -> std::result::Result<(), SymphoniaError> {
        while self.skip > 0 {
            if !self.decode_next()? {
                break;
            }
        }
        Ok(())
    }

    /// Accurate container seek, then decode-and-skip to the exact frame
    fn seek_accurate(&mut self, frame: u64, sample_rate: u32) -> std::result::Result<(), SymphoniaError> {
        let ts = frames_to_ts(frame, sample_rate, self.time_base);
        let seeked = self.reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts,
                track_id: self.track,
            },
        )?;

        self.decoder.reset();
        self.pending = 0..0;
        self.decode_errors = 0;
        self.hit_eof = false;
        self.skip = ts_to_frames(
            seeked.required_ts.saturating_sub(seeked.actual_ts),
            sample_rate,
            self.time_base,
        );
        self.drain_skip()
    }

    /// Rebuild the scratch in another sample type, keeping the pending packet
    fn convert_scratch(&mut self, sample_type: SampleType, channels: Channels, sample_rate: u32) {
        let frames = (self.scratch.capacity() / self.channels.max(1)) as u64;
        let mut scratch = DecodeScratch::new(sample_type, frames.max(1), SignalSpec::new(sample_rate, channels));
        if !self.pending.is_empty() {
            scratch.load(self.decoder.last_decoded());
        }
        self.scratch = scratch;
    }
}

/// Sample type the codec decodes to without widening or narrowing
fn native_sample_type(params: &CodecParameters) -> SampleType {
    match params.sample_format {
        Some(SampleFormat::U8 | SampleFormat::S8 | SampleFormat::U16 | SampleFormat::S16) => SampleType::I16,
        Some(SampleFormat::U24 | SampleFormat::S24 | SampleFormat::U32 | SampleFormat::S32) => {
            SampleType::I32
        }
        Some(SampleFormat::F32 | SampleFormat::F64) => SampleType::F32,
        None if [
            CODEC_TYPE_PCM_F32LE,
            CODEC_TYPE_PCM_F32BE,
            CODEC_TYPE_PCM_F64LE,
            CODEC_TYPE_PCM_F64BE,
        ]
        .contains(&params.codec) =>
        {
            SampleType::F32
        }
        // Lossless integer codecs declare a bit depth; lossy ones decode to float
        None => match params.bits_per_sample {
            Some(bits) if bits <= 16 => SampleType::I16,
            Some(_) => SampleType::I32,
            None => SampleType::F32,
        },
    }
}

fn open_error(path: &Path, err: SymphoniaError) -> Error {
    match err {
        SymphoniaError::IoError(e) if e.kind() != std::io::ErrorKind::UnexpectedEof => Error::Io(e),
        other => {
            warn!("Cannot decode {}: {}", path.display(), other);
            Error::UnsupportedFormat(format!("{}: {}", path.display(), other))
        }
    }
}

fn frames_to_ts(frame: u64, sample_rate: u32, time_base: Option<TimeBase>) -> u64 {
    match time_base {
        Some(tb) if !(tb.numer == 1 && tb.denom == sample_rate) => {
            let rate = sample_rate as u64;
            tb.calc_timestamp(Time::new(frame / rate, (frame % rate) as f64 / rate as f64))
        }
        _ => frame,
    }
}

fn ts_to_frames(ts: u64, sample_rate: u32, time_base: Option<TimeBase>) -> u64 {
    match time_base {
        Some(tb) if !(tb.numer == 1 && tb.denom == sample_rate) => {
            let time = tb.calc_time(ts);
            time.seconds * sample_rate as u64 + (time.frac * sample_rate as f64).round() as u64
        }
        _ => ts,
    }
}

/// One packet of samples, converted to the target sample type
enum DecodeScratch {
    I16(SampleBuffer<i16>),
    I32(SampleBuffer<i32>),
    F32(SampleBuffer<f32>),
}

macro_rules! with_scratch {
    ($scratch:expr, $buf:ident => $body:expr) => {
        match $scratch {
            DecodeScratch::I16($buf) => $body,
            DecodeScratch::I32($buf) => $body,
            DecodeScratch::F32($buf) => $body,
        }
    };
}

impl DecodeScratch {
    fn new(sample_type: SampleType, frames: u64, spec: SignalSpec) -> Self {
        match sample_type {
            SampleType::I16 => DecodeScratch::I16(SampleBuffer::new(frames, spec)),
            SampleType::I32 => DecodeScratch::I32(SampleBuffer::new(frames, spec)),
            SampleType::F32 => DecodeScratch::F32(SampleBuffer::new(frames, spec)),
        }
    }

    /// Capacity in samples
    fn capacity(&self) -> usize {
        with_scratch!(self, buf => buf.capacity())
    }

    fn load(&mut self, decoded: AudioBufferRef<'_>) {
        let needed = decoded.frames() * decoded.spec().channels.count();
        with_scratch!(self, buf => {
            if buf.capacity() < needed {
                *buf = SampleBuffer::new(decoded.capacity() as u64, *decoded.spec());
            }
            buf.copy_interleaved_ref(decoded);
        })
    }

    /// Write scratch frames `frames` into the request at `at_frame`
    fn write_into<B: AsMut<[u8]>>(
        &self,
        request: &mut BufferRequest<'_, B>,
        at_frame: usize,
        frames: Range<usize>,
        channels: usize,
    ) -> usize {
        with_scratch!(self, buf => {
            let samples = buf.samples();
            let end = (frames.end * channels).min(samples.len());
            let start = (frames.start * channels).min(end);
            request.write_frames(at_frame, &samples[start..end])
        })
    }
}
