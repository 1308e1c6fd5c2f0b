//! # diskstream common library
//!
//! Shared code for the diskstream crates:
//! - Error type
//! - Bootstrap configuration loading and library root resolution
//! - Playback event types and the EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
