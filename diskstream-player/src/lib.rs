//! # diskstream-player
//!
//! Streams decoded audio from library tracks on disk into a real-time output
//! callback, one device buffer at a time, without loading whole tracks.
//!
//! **Architecture:** symphonia decode straight into device buffers, pulled by a
//! cpal (or software clock) callback.
//!
//! - [`audio::FrameSource`] opens tracks and yields [`audio::TrackHandle`]s
//! - [`audio::Output`] negotiates the device format and drives a [`audio::DataSource`]
//! - [`playback::PlaybackController`] is the control surface over both

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
