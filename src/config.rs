//! Persistent defaults for keystream.
//!
//! The configuration file is located at `~/.keystream/config.toml`. Every
//! key is optional and command-line flags always win:
//!
//! ```toml
//! # Seconds of silence that end a transmission
//! timeout = 3
//!
//! # Mirror captured characters to the terminal
//! echo = false
//!
//! # Keep text exactly as received (no trailing newline)
//! rawtext = false
//!
//! # write, overwrite or append
//! mode = "write"
//!
//! # Add a _NNNN suffix to every filename
//! numbered = false
//!
//! # Where default filenames are created, and their prefix
//! directory = "~/captures"
//! prefix = "capture"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{CaptureError, Result};
use crate::files::WriteMode;

/// Default idle timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Idle timeout in seconds
    pub timeout: u64,
    pub echo: bool,
    pub rawtext: bool,
    pub mode: WriteMode,
    pub numbered: bool,
    /// Directory for default filenames
    pub directory: Option<PathBuf>,
    /// Prefix for default filenames
    pub prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            echo: false,
            rawtext: false,
            mode: WriteMode::Write,
            numbered: false,
            directory: None,
            prefix: "capture".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `~/.keystream/config.toml`.
    /// A missing home config yields the defaults, but a missing file given
    /// explicitly is an error. A broken file is reported and ignored.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(explicit) if !explicit.exists() => {
                return Err(CaptureError::Configuration(format!(
                    "config file {} does not exist",
                    explicit.display()
                )));
            }
            Some(explicit) => explicit.to_path_buf(),
            None => match Self::get_config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };
        let config = match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                Self::default()
            }
        };
        Ok(config)
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(content)?;
        if let Some(dir) = config.directory.take() {
            config.directory = Some(expand_home(&dir));
        }
        Ok(config)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".keystream").join("config.toml"))
    }
}

/// Replace a leading `~` with the home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
