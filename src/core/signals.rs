//! Termination-signal flag.
//!
//! While capturing, SIGINT/SIGTERM/SIGHUP only raise a shared flag. The
//! capture loop notices it within one poll interval and unwinds, so the
//! terminal guard still restores the tty.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::debug;

/// Route termination signals to a fresh flag and return it.
pub fn install() -> io::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&flag))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&flag))?;
    #[cfg(unix)]
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&flag))?;
    debug!("Termination signal handlers installed");
    Ok(flag)
}
