//! Terminal mode controller
//!
//! Puts standard input into cbreak mode for the duration of a capture:
//! keystrokes arrive one at a time, without waiting for a newline and
//! without terminal echo. Signal keys (Ctrl+C) stay with the driver.
//!
//! The saved configuration is restored exactly once, either through
//! [`TerminalMode::release`] or when the guard is dropped (early return,
//! error propagation, panic unwind).

use std::io;

use crossterm::tty::IsTty;
use tracing::{debug, warn};

use crate::error::{CaptureError, Result};

/// Scoped cbreak mode on an input terminal
pub struct TerminalMode {
    #[cfg(unix)]
    fd: std::os::unix::io::RawFd,
    #[cfg(unix)]
    saved: libc::termios,
    active: bool,
}

impl TerminalMode {
    /// Switch standard input into cbreak mode.
    pub fn acquire() -> Result<Self> {
        let stdin = io::stdin();
        if !stdin.is_tty() {
            return Err(not_a_terminal());
        }
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            Self::acquire_fd(stdin.as_raw_fd())
        }
        #[cfg(not(unix))]
        {
            crossterm::terminal::enable_raw_mode().map_err(CaptureError::TerminalControl)?;
            debug!("Raw mode enabled");
            Ok(Self { active: true })
        }
    }

    /// Switch the terminal behind `fd` into cbreak mode.
    #[cfg(unix)]
    pub fn acquire_fd(fd: std::os::unix::io::RawFd) -> Result<Self> {
        // SAFETY: isatty/tcgetattr/tcsetattr only read or write the termios we pass.
        unsafe {
            if libc::isatty(fd) != 1 {
                return Err(not_a_terminal());
            }
            let mut saved: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut saved) != 0 {
                return Err(CaptureError::TerminalControl(io::Error::last_os_error()));
            }

            let mut cbreak = saved;
            cbreak.c_lflag &= !(libc::ICANON | libc::ECHO);
            cbreak.c_cc[libc::VMIN] = 1;
            cbreak.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(fd, libc::TCSAFLUSH, &cbreak) != 0 {
                return Err(CaptureError::TerminalControl(io::Error::last_os_error()));
            }

            debug!(fd, "cbreak mode enabled");
            Ok(Self { fd, saved, active: true })
        }
    }

    /// Restore the saved configuration, reporting failure.
    pub fn release(mut self) -> Result<()> {
        self.restore().map_err(CaptureError::TerminalControl)
    }

    fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        #[cfg(unix)]
        {
            // SAFETY: `saved` was filled by tcgetattr on this fd.
            if unsafe { libc::tcsetattr(self.fd, libc::TCSADRAIN, &self.saved) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        #[cfg(not(unix))]
        {
            crossterm::terminal::disable_raw_mode()?;
        }

        debug!("Terminal mode restored");
        Ok(())
    }
}

impl Drop for TerminalMode {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

fn not_a_terminal() -> CaptureError {
    CaptureError::TerminalControl(io::Error::new(
        io::ErrorKind::Unsupported,
        "standard input is not an interactive terminal",
    ))
}
