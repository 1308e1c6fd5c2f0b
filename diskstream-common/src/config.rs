//! Configuration loading and library root resolution
//!
//! Bootstrap configuration lives in a small TOML file. Everything in it is
//! optional: a missing file means built-in defaults, never a startup failure.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted for the library root
pub const LIBRARY_ROOT_ENV: &str = "DISKSTREAM_LIBRARY";

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Library root resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `library_root` from the TOML config file
/// 4. OS-dependent default
pub fn resolve_library_root(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        debug!("Library root from command line: {}", path.display());
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            debug!("Library root from {}: {}", env_var_name, path);
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        debug!("Library root from config file: {}", path.display());
        return path.to_path_buf();
    }

    default_library_root()
}

/// OS-dependent default library root
///
/// The platform audio directory (`~/Music` on Linux and macOS, `%USERPROFILE%\Music`
/// on Windows), falling back to `./music` when the home directory is unknown.
pub fn default_library_root() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("./music"))
}

/// Locate the default configuration file for the platform
///
/// Linux checks `~/.config/diskstream/config.toml` and then
/// `/etc/diskstream/config.toml`; other platforms only check the user config dir.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("diskstream").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/diskstream/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&content)?)
}

/// Load a config file, degrading to `T::default()` when it is missing
///
/// An explicitly requested file that does not exist is an error. When no path is
/// given, the platform default location is tried and its absence is fine. A file
/// that exists but fails to parse is always an error.
pub fn load_or_default<T: DeserializeOwned + Default>(explicit: Option<&Path>) -> Result<T> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::NotFound(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) => path,
            None => {
                warn!("No config file found, using built-in defaults");
                return Ok(T::default());
            }
        },
    };

    debug!("Loading config from {}", path.display());
    load_toml(&path)
}
