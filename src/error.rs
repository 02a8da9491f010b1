//! Error taxonomy for keystream.
//!
//! Every failure that reaches `main` is a [`CaptureError`] (or an unexpected
//! `anyhow` error, which exits with 1). Each variant carries its own exit code.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Operator pressed the abort key before the device started sending
    #[error("Capture aborted before transmission started")]
    EarlyExitRequested,

    #[error("Terminal control failed: {0}")]
    TerminalControl(#[source] io::Error),

    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("{} is not valid UTF-8 (first invalid byte at offset {})", .path.display(), .offset)]
    Validation { path: PathBuf, offset: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A termination signal arrived while capturing
    #[error("Capture interrupted by signal")]
    Interrupted,
}

impl CaptureError {
    /// Process exit code reported for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            CaptureError::Configuration(_) => 2,
            CaptureError::EarlyExitRequested => 3,
            CaptureError::TerminalControl(_) => 4,
            CaptureError::Io(_) => 5,
            CaptureError::Validation { .. } => 6,
            CaptureError::Interrupted => 130,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
