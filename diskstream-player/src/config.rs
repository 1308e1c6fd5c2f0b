//! Player bootstrap configuration
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (DISKSTREAM_LIBRARY)
//! 3. TOML configuration file
//! 4. Built-in defaults

use crate::audio::format::{FormatHint, SampleType};
use crate::error::{Error, Result};
use diskstream_common::config::{self as common_config, LoggingConfig, LIBRARY_ROOT_ENV};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Player configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerConfig {
    /// Library root folder (optional; see `library_root` for resolution)
    #[serde(default)]
    pub library_root: Option<PathBuf>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Output device preferences
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Device name; None = system default, "null" = software clock
    #[serde(default)]
    pub device: Option<String>,

    /// Frames per device callback
    ///
    /// Default: 512
    #[serde(default = "default_frames_per_buffer")]
    pub frames_per_buffer: u32,

    /// Preferred sample rate (None = follow the track)
    #[serde(default)]
    pub sample_rate: Option<u32>,

    /// Preferred channel count (None = follow the track)
    #[serde(default)]
    pub channels: Option<u16>,

    /// Preferred sample format: "i16", "i32" or "f32" (None = follow the track)
    #[serde(default)]
    pub sample_format: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            frames_per_buffer: default_frames_per_buffer(),
            sample_rate: None,
            channels: None,
            sample_format: None,
        }
    }
}

fn default_frames_per_buffer() -> u32 {
    512
}

impl OutputConfig {
    /// Device format preferences expressed by this config
    pub fn format_hint(&self) -> Result<FormatHint> {
        let sample_type = self
            .sample_format
            .as_deref()
            .map(str::parse::<SampleType>)
            .transpose()
            .map_err(Error::Config)?;

        Ok(FormatHint {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_type,
            layout: None,
        })
    }

    /// Whether the software clock backend is selected
    pub fn is_null_device(&self) -> bool {
        self.device
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case("null"))
    }
}

impl PlayerConfig {
    /// Load from `path`, or from the platform default location, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: PlayerConfig = common_config::load_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the library root against the CLI argument and environment
    pub fn library_root(&self, cli_arg: Option<&Path>) -> PathBuf {
        common_config::resolve_library_root(cli_arg, LIBRARY_ROOT_ENV, self.library_root.as_deref())
    }

    fn validate(&self) -> Result<()> {
        if self.output.frames_per_buffer == 0 {
            return Err(Error::Config("output.frames_per_buffer must be at least 1".to_string()));
        }
        if self.output.channels == Some(0) {
            return Err(Error::Config("output.channels must be at least 1".to_string()));
        }
        if self.output.sample_rate == Some(0) {
            return Err(Error::Config("output.sample_rate must be positive".to_string()));
        }
        self.output.format_hint()?;
        Ok(())
    }
}
