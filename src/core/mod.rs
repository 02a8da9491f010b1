//! Capture core.
//!
//! - **terminal**: scoped cbreak mode on standard input
//! - **input**: non-blocking character source
//! - **capture**: the capture state machine and idle timeout
//! - **stats**: word-boundary accounting and the final statistics record
//! - **signals**: termination-signal flag checked by the capture loop
//!
//! # Architecture
//!
//! ```text
//! TerminalMode (guard, restored on every exit path)
//! └── CaptureSession
//!     ├── CharSource (StdinSource)
//!     ├── Clock (SystemClock)
//!     └── WordCounter ──▶ CaptureStats
//! ```

pub mod capture;
pub mod input;
pub mod signals;
pub mod stats;
pub mod terminal;
