//! Character and word accounting for a capture session.

use std::fmt;
use std::time::Duration;

/// Average characters per word used for the length-based estimate
pub const CHARS_PER_WORD: u64 = 6;

/// Characters that end a word: whitespace plus `. ? ! : ; "`
pub fn is_terminator(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '.' | '?' | '!' | ':' | ';' | '"')
}

/// Running counters, updated once per accepted character.
#[derive(Debug, Default)]
pub struct WordCounter {
    chars: u64,
    words: u64,
    last: Option<char>,
}

impl WordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one accepted character.
    pub fn accept(&mut self, ch: char) {
        self.chars += 1;
        // No previous character behaves like a terminator
        if matches!(self.last, Some(prev) if !is_terminator(prev)) && is_terminator(ch) {
            self.words += 1;
        }
        self.last = Some(ch);
    }

    /// Count a character appended after capture (the trailing newline).
    /// It does not participate in word detection.
    pub fn append_untracked(&mut self) {
        self.chars += 1;
    }

    pub fn last(&self) -> Option<char> {
        self.last
    }

    /// Close the count, crediting a trailing partial word.
    pub fn finish(&self, elapsed: Duration) -> CaptureStats {
        let trailing = match self.last {
            Some(ch) if !is_terminator(ch) => 1,
            _ => 0,
        };
        CaptureStats {
            chars: self.chars,
            words_actual: self.words + trailing,
            words_heuristic: self.chars / CHARS_PER_WORD,
            elapsed,
        }
    }
}

/// Final statistics record for a completed capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    /// Characters written, including an appended newline
    pub chars: u64,
    /// Words counted by terminator transitions
    pub words_actual: u64,
    /// Words estimated as `chars / 6`
    pub words_heuristic: u64,
    /// Time between the first and the last accepted character
    pub elapsed: Duration,
}

impl CaptureStats {
    pub fn chars_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.chars as f64 / secs)
        } else {
            None
        }
    }
}

impl fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} characters, {} words ({} estimated), {:.2}s",
            self.chars,
            self.words_actual,
            self.words_heuristic,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(rate) = self.chars_per_second() {
            write!(f, ", {:.1} chars/s", rate)?;
        }
        Ok(())
    }
}
