//! keystream - capture text sent by keyboard-emulating devices
//!
//! Devices such as barcode scanners, stenotype bridges and macro pads
//! "type" their output into whatever has focus. keystream puts the terminal
//! into cbreak mode, records every character the device sends into a file,
//! and stops once the device has been silent for a while.
//!
//! # Quick Start
//!
//! ```text
//! keystream                        # capture_YYYYmmdd_HHMMSS.txt, 3s timeout
//! keystream notes.txt --echo       # show characters as they arrive
//! keystream log.txt --mode append  # add to an existing file
//! keystream scan.txt --numbered    # scan_0001.txt, scan_0002.txt, ...
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Capture completed |
//! | 1 | Unexpected failure |
//! | 2 | Invalid configuration |
//! | 3 | Aborted with Esc before transmission |
//! | 4 | Terminal mode could not be changed |
//! | 5 | Read or write failure |
//! | 6 | Captured file is not valid UTF-8 |
//! | 130 | Interrupted by a signal |

mod cli;
mod config;
mod core;
mod error;
mod files;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::Parser;
use crossterm::tty::IsTty;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::cli::{Args, Options};
use crate::config::Config;
use crate::core::capture::{CaptureOutcome, CaptureSession, CaptureSettings, SystemClock};
use crate::core::input::StdinSource;
use crate::core::signals;
use crate::core::terminal::TerminalMode;
use crate::error::CaptureError;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.whisper);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<CaptureError>() {
            // Already reported as a warning
            Some(CaptureError::EarlyExitRequested) => ExitCode::from(CaptureError::EarlyExitRequested.exit_code()),
            Some(capture_error) => {
                error!("{}", capture_error);
                ExitCode::from(capture_error.exit_code())
            }
            None => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

/// Operator-facing messages go to stderr; stdout carries echoed text.
fn init_logging(whisper: bool) {
    let filter = log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), whisper);
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_tty())
        .with_target(false)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// `RUST_LOG` directives if valid, otherwise info. `--whisper` caps the
/// result at warn whichever way it was built.
fn log_filter(directives: Option<&str>, whisper: bool) -> EnvFilter {
    let default = if whisper { "warn" } else { "info" };
    let filter = directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default));
    if whisper && filter.max_level_hint().map_or(true, |level| level > LevelFilter::WARN) {
        return EnvFilter::new("warn");
    }
    filter
}

fn run(args: Args) -> anyhow::Result<()> {
    // Taken once; default filenames never drift during a session
    let started = Local::now();
    let config = Config::load(args.config.as_deref())?;
    let options = args.resolve(config);
    if options.timeout == 0 {
        return Err(CaptureError::Configuration("timeout must be a positive number of seconds".into()).into());
    }

    let path = destination_path(&options, &started)?;
    files::check_target(&path, options.mode)?;
    let interrupt = signals::install().map_err(CaptureError::Io)?;

    let mut file = files::open_destination(&path, options.mode)?;
    info!("Capturing to {}", path.display());

    let mut settings = CaptureSettings::new(Duration::from_secs(options.timeout));
    settings.echo = options.echo;
    settings.raw_text = options.rawtext;
    settings.interrupt = interrupt;
    let outcome = {
        let terminal = TerminalMode::acquire()?;
        let session = CaptureSession::new(settings, StdinSource::new(), SystemClock);
        let result = session.run(&mut file, &mut io::stdout());
        // The guard restores on drop too; releasing here surfaces restore failures
        let released = terminal.release();
        let outcome = result?;
        released?;
        outcome
    };
    file.sync_all().map_err(CaptureError::Io)?;
    drop(file);

    let stats = match outcome {
        CaptureOutcome::Completed(stats) => stats,
        CaptureOutcome::AbortedEarly => {
            warn!("{} may have been created with no content", path.display());
            return Err(CaptureError::EarlyExitRequested.into());
        }
    };
    files::validate_utf8(&path)?;
    info!("Saved {}", path.display());
    info!("{}", stats);
    Ok(())
}

/// Explicit filename, or a timestamped one; numbered on request.
fn destination_path(options: &Options, started: &DateTime<Local>) -> anyhow::Result<PathBuf> {
    let path = match &options.filename {
        Some(name) => name.clone(),
        None => {
            let name = files::default_filename(started, &options.prefix);
            match &options.directory {
                Some(dir) => dir.join(name),
                None => PathBuf::from(name),
            }
        }
    };
    if options.numbered {
        return Ok(files::numbered_filename(&path).map_err(CaptureError::Io)?);
    }
    Ok(path)
}
