//! Error types for diskstream-player
//!
//! Configuration-time errors (`AssetNotFound`, `UnsupportedFormat`, `FormatMismatch`)
//! surface synchronously to the control context. Nothing in this enum is ever
//! constructed on the real-time render path except the allocation-free
//! `BufferCount` / `BufferCapacity` variants.

use crate::audio::format::AudioFormatDescriptor;
use thiserror::Error;

/// Main error type for diskstream-player
#[derive(Error, Debug)]
pub enum Error {
    /// Track identifier did not resolve to an asset
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Asset container or codec cannot be decoded
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Storage failure
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Seek target beyond the known track length
    #[error("Seek out of range: frame {requested} beyond track length {length}")]
    SeekOutOfRange { requested: u64, length: u64 },

    /// Decode target and device format disagree
    #[error("Format mismatch: device requires {expected}, source provides {actual}")]
    FormatMismatch {
        expected: AudioFormatDescriptor,
        actual: AudioFormatDescriptor,
    },

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Destination buffer list has the wrong number of channel buffers
    #[error("Buffer list has {actual} buffers, format requires {expected}")]
    BufferCount { expected: usize, actual: usize },

    /// A destination buffer is smaller than the requested frames need
    #[error("Buffer holds {actual} bytes, request requires {required}")]
    BufferCapacity { required: usize, actual: usize },

    /// Audio decoding errors after the session was opened
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration file or argument errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] diskstream_common::Error),
}

/// Convenience Result type using diskstream-player Error
pub type Result<T> = std::result::Result<T, Error>;
