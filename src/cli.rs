//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::files::WriteMode;

/// Capture text typed by a keyboard-emulating device into a file.
///
/// Start keystream, then trigger the device. The capture ends after the
/// device has been silent for the idle timeout. Press Esc before the
/// device starts sending to abort.
#[derive(Debug, Parser)]
#[command(name = "keystream", version)]
pub struct Args {
    /// Destination file (default: timestamped name)
    pub filename: Option<PathBuf>,

    /// Show characters as they arrive
    #[arg(long)]
    pub echo: bool,

    /// What to do when the destination already exists
    #[arg(long, value_enum)]
    pub mode: Option<WriteMode>,

    /// Add the smallest unused _NNNN suffix to the filename
    #[arg(long)]
    pub numbered: bool,

    /// Keep the text exactly as received (no trailing newline)
    #[arg(long)]
    pub rawtext: bool,

    /// Seconds of silence that end the transmission
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Only report warnings and errors (caps RUST_LOG at warn)
    #[arg(long)]
    pub whisper: bool,

    /// Read defaults from this file instead of ~/.keystream/config.toml
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Fully resolved options for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub filename: Option<PathBuf>,
    pub echo: bool,
    pub mode: WriteMode,
    pub numbered: bool,
    pub rawtext: bool,
    pub timeout: u64,
    pub directory: Option<PathBuf>,
    pub prefix: String,
}

impl Args {
    /// Merge with file defaults. Flags can only switch options on.
    pub fn resolve(self, config: Config) -> Options {
        Options {
            filename: self.filename,
            echo: self.echo || config.echo,
            mode: self.mode.unwrap_or(config.mode),
            numbered: self.numbered || config.numbered,
            rawtext: self.rawtext || config.rawtext,
            timeout: self.timeout.unwrap_or(config.timeout),
            directory: config.directory,
            prefix: config.prefix,
        }
    }
}
