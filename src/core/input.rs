//! Non-blocking character input.
//!
//! The capture loop never blocks indefinitely on a read: it asks the source
//! whether a character is ready within a bounded wait, and only then reads.

use std::io;
use std::time::Duration;

/// A stream of characters that can be polled without blocking
pub trait CharSource {
    /// Wait at most `timeout` for input. Returns true when a character can
    /// be read without blocking.
    fn poll(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Read the next character. Only called after `poll` returned true.
    fn read_char(&mut self) -> io::Result<char>;
}

/// Longest wait for the continuation bytes of a multi-byte character
#[cfg(unix)]
const CONTINUATION_WAIT: Duration = Duration::from_millis(100);

/// Encoded length of a UTF-8 sequence starting with `lead`
#[cfg_attr(not(unix), allow(dead_code))]
fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Assemble one character from `first` and as many bytes from `next` as the
/// lead byte announces.
#[cfg_attr(not(unix), allow(dead_code))]
fn decode_char(first: u8, mut next: impl FnMut() -> io::Result<u8>) -> io::Result<char> {
    let width = utf8_width(first).ok_or_else(|| invalid_utf8(first))?;
    let mut buf = [first, 0, 0, 0];
    for slot in buf.iter_mut().take(width).skip(1) {
        *slot = next()?;
    }
    std::str::from_utf8(&buf[..width])
        .ok()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| invalid_utf8(first))
}

#[cfg_attr(not(unix), allow(dead_code))]
fn invalid_utf8(byte: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("invalid UTF-8 sequence starting with byte 0x{:02x}", byte),
    )
}

/// Standard input read byte-wise through the raw file descriptor, so no
/// userspace buffer hides bytes from `poll`.
#[cfg(unix)]
pub struct StdinSource {
    fd: std::os::unix::io::RawFd,
}

#[cfg(unix)]
impl StdinSource {
    pub fn new() -> Self {
        use std::os::unix::io::AsRawFd;
        Self { fd: io::stdin().as_raw_fd() }
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd { fd: self.fd, events: libc::POLLIN, revents: 0 };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: one valid pollfd.
        let ready = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                // The caller checks the signal flag
                return Ok(false);
            }
            return Err(err);
        }
        // POLLHUP/POLLERR also report readable so the read surfaces the failure
        Ok(ready > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }

    fn read_byte(&self) -> io::Result<u8> {
        let mut byte = 0u8;
        loop {
            // SAFETY: reading at most one byte into a local.
            let n = unsafe { libc::read(self.fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
            match n {
                1 => return Ok(byte),
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "standard input closed",
                    ))
                }
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
impl CharSource for StdinSource {
    fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
        self.wait_readable(timeout)
    }

    fn read_char(&mut self) -> io::Result<char> {
        let first = self.read_byte()?;
        decode_char(first, || {
            if self.wait_readable(CONTINUATION_WAIT)? {
                self.read_byte()
            } else {
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "truncated UTF-8 sequence",
                ))
            }
        })
    }
}

/// Standard input read as crossterm key events (raw mode consoles)
#[cfg(not(unix))]
pub struct StdinSource {
    pending: Option<char>,
}

#[cfg(not(unix))]
impl StdinSource {
    pub fn new() -> Self {
        Self { pending: None }
    }
}

#[cfg(not(unix))]
impl CharSource for StdinSource {
    fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
        use crossterm::event::{self, Event, KeyCode, KeyEventKind};

        if self.pending.is_some() {
            return Ok(true);
        }
        if !event::poll(timeout)? {
            return Ok(false);
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Release {
                self.pending = match key.code {
                    KeyCode::Char(c) => Some(c),
                    KeyCode::Enter => Some('\n'),
                    KeyCode::Tab => Some('\t'),
                    KeyCode::Backspace => Some('\x08'),
                    KeyCode::Esc => Some('\x1b'),
                    _ => None,
                };
            }
        }
        Ok(self.pending.is_some())
    }

    fn read_char(&mut self) -> io::Result<char> {
        self.pending
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no key pending"))
    }
}
