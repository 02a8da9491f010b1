//! Capture loop
//!
//! Drives one capture session through its phases:
//!
//! ```text
//! AwaitingFirstInput ──Esc──▶ AbortedEarly
//!        │
//!   any other char
//!        ▼
//!    Receiving ──idle > timeout──▶ Completed
//! ```
//!
//! The abort key is only honoured before the first character. Once the
//! device is sending, every character (Esc included) is content.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::queue;
use crossterm::style::Print;
use tracing::{debug, info, warn};

use super::input::CharSource;
use super::stats::{CaptureStats, WordCounter};
use crate::error::{CaptureError, Result};

/// Key that aborts a capture before transmission starts
pub const EXIT_KEY: char = '\x1b';

/// Bounded wait for each readiness check
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Time source for idle detection
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Per-session settings, fixed for the life of the session
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Mirror accepted characters to the echo stream
    pub echo: bool,
    /// Silence after the last character that ends the transmission
    pub idle_timeout: Duration,
    /// Leave the captured text exactly as received (no trailing newline)
    pub raw_text: bool,
    /// Longest wait of a single readiness check; bounds how late the idle
    /// timeout and the interrupt flag are noticed
    pub poll_interval: Duration,
    /// Raised by a termination signal; checked before every poll
    pub interrupt: Arc<AtomicBool>,
}

impl CaptureSettings {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            echo: false,
            idle_timeout,
            raw_text: false,
            poll_interval: POLL_INTERVAL,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstInput,
    Receiving,
    Completed,
    AbortedEarly,
}

/// How a capture ended (failures are returned as `Err`)
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Completed(CaptureStats),
    AbortedEarly,
}

/// State of a single capture
pub struct CaptureSession<S: CharSource, C: Clock> {
    settings: CaptureSettings,
    source: S,
    clock: C,
    counter: WordCounter,
    phase: Phase,
    first_input_at: Option<Instant>,
    last_input_at: Option<Instant>,
}

impl<S: CharSource, C: Clock> CaptureSession<S, C> {
    pub fn new(settings: CaptureSettings, source: S, clock: C) -> Self {
        Self {
            settings,
            source,
            clock,
            counter: WordCounter::new(),
            phase: Phase::AwaitingFirstInput,
            first_input_at: None,
            last_input_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run until the transmission completes, the operator aborts, or a
    /// failure occurs. Accepted characters go to `dest` (and to `echo` when
    /// echo is enabled) in arrival order. The session is used up.
    pub fn run<W: Write, E: Write>(mut self, dest: &mut W, echo: &mut E) -> Result<CaptureOutcome> {
        info!(
            "Waiting for transmission (idle timeout {}s, press Esc to abort)",
            self.settings.idle_timeout.as_secs_f64()
        );
        loop {
            if let Some(outcome) = self.step(dest, echo)? {
                debug!(phase = ?self.phase(), "Capture finished");
                return Ok(outcome);
            }
        }
    }

    /// One poll of the state machine. Returns the outcome once a terminal
    /// phase is reached; must not be called again after that.
    fn step<W: Write, E: Write>(&mut self, dest: &mut W, echo: &mut E) -> Result<Option<CaptureOutcome>> {
        if self.settings.interrupt.load(Ordering::SeqCst) {
            return Err(CaptureError::Interrupted);
        }
        let ready = self.source.poll(self.settings.poll_interval)?;

        match self.phase {
            Phase::AwaitingFirstInput => {
                // No timeout before the first character
                if !ready {
                    return Ok(None);
                }
                let ch = self.source.read_char()?;
                if ch == EXIT_KEY {
                    self.phase = Phase::AbortedEarly;
                    warn!("Abort key pressed before transmission started");
                    return Ok(Some(CaptureOutcome::AbortedEarly));
                }
                // Logged before the echo so it never lands mid-line
                info!("Transmission started");
                self.accept(ch, dest, echo)?;
                self.first_input_at = self.last_input_at;
                self.phase = Phase::Receiving;
                Ok(None)
            }
            Phase::Receiving => {
                if ready {
                    let ch = self.source.read_char()?;
                    self.accept(ch, dest, echo)?;
                    return Ok(None);
                }
                let idle = match self.last_input_at {
                    Some(last) => self.clock.now().saturating_duration_since(last),
                    None => Duration::ZERO,
                };
                if idle > self.settings.idle_timeout {
                    debug!(idle_ms = idle.as_millis() as u64, "Idle timeout reached");
                    let stats = self.complete(dest, echo)?;
                    return Ok(Some(CaptureOutcome::Completed(stats)));
                }
                Ok(None)
            }
            Phase::Completed | Phase::AbortedEarly => {
                unreachable!("capture session stepped after it already finished")
            }
        }
    }

    fn accept<W: Write, E: Write>(&mut self, ch: char, dest: &mut W, echo: &mut E) -> Result<()> {
        let mut buf = [0u8; 4];
        dest.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
        dest.flush()?;
        if self.settings.echo {
            queue!(echo, Print(ch))?;
            echo.flush()?;
        }
        self.counter.accept(ch);
        self.last_input_at = Some(self.clock.now());
        Ok(())
    }

    fn complete<W: Write, E: Write>(&mut self, dest: &mut W, echo: &mut E) -> Result<CaptureStats> {
        // Word count is closed before the newline so it cannot affect it
        let elapsed = match (self.first_input_at, self.last_input_at) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        };
        let ends_line = self.counter.last() == Some('\n');
        if !self.settings.raw_text && !ends_line {
            dest.write_all(b"\n")?;
            self.counter.append_untracked();
        }
        dest.flush()?;
        if self.settings.echo && !ends_line {
            // Echoed text gets its own line ahead of the completion log
            queue!(echo, Print('\n'))?;
            echo.flush()?;
        }
        self.phase = Phase::Completed;

        let stats = self.counter.finish(elapsed);
        info!("Transmission complete: {}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    #[derive(Clone)]
    struct ManualClock(Rc<Cell<Instant>>);

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }

    /// Characters arriving at fixed offsets from the start of the test.
    /// Polling advances the shared clock, never past the next arrival.
    struct ScriptedSource {
        clock: ManualClock,
        start: Instant,
        events: VecDeque<(Duration, char)>,
        fail_read: bool,
    }

    impl ScriptedSource {
        fn new(clock: &ManualClock, script: &[(u64, &str)]) -> Self {
            let mut events = VecDeque::new();
            for &(at_ms, text) in script {
                for ch in text.chars() {
                    events.push_back((Duration::from_millis(at_ms), ch));
                }
            }
            Self { clock: clock.clone(), start: clock.now(), events, fail_read: false }
        }

        fn due(&self) -> bool {
            self.events
                .front()
                .map_or(false, |(at, _)| self.start + *at <= self.clock.now())
        }
    }

    impl CharSource for ScriptedSource {
        fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
            if self.due() {
                return Ok(true);
            }
            let mut next = self.clock.now() + timeout;
            if let Some((at, _)) = self.events.front() {
                next = next.min(self.start + *at);
            }
            self.clock.0.set(next);
            Ok(self.due())
        }

        fn read_char(&mut self) -> io::Result<char> {
            if self.fail_read {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            self.events
                .pop_front()
                .map(|(_, ch)| ch)
                .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "empty"))
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn settings(timeout_secs: u64) -> CaptureSettings {
        CaptureSettings::new(Duration::from_secs(timeout_secs))
    }

    fn session(
        settings: CaptureSettings,
        script: &[(u64, &str)],
    ) -> (CaptureSession<ScriptedSource, ManualClock>, ManualClock) {
        let clock = ManualClock(Rc::new(Cell::new(Instant::now())));
        let source = ScriptedSource::new(&clock, script);
        (CaptureSession::new(settings, source, clock.clone()), clock)
    }

    fn capture(settings: CaptureSettings, script: &[(u64, &str)]) -> (Result<CaptureOutcome>, Vec<u8>, Vec<u8>) {
        let (session, _) = session(settings, script);
        let mut dest = Vec::new();
        let mut echo = Vec::new();
        let result = session.run(&mut dest, &mut echo);
        (result, dest, echo)
    }

    #[test]
    fn test_sentence_gets_trailing_newline() {
        let (result, dest, echo) = capture(settings(3), &[(0, "hi there.")]);
        let stats = match result.unwrap() {
            CaptureOutcome::Completed(stats) => stats,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(dest, b"hi there.\n");
        assert_eq!(stats.chars, 10);
        assert_eq!(stats.words_actual, 2);
        assert_eq!(stats.words_heuristic, 1);
        assert!(echo.is_empty());
    }

    #[test]
    fn test_raw_text_is_left_untouched() {
        let mut s = settings(3);
        s.raw_text = true;
        let (result, dest, _) = capture(s, &[(0, "abc")]);
        match result.unwrap() {
            CaptureOutcome::Completed(stats) => {
                assert_eq!(stats.chars, 3);
                assert_eq!(stats.words_actual, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(dest, b"abc");
    }

    #[test]
    fn test_no_newline_added_after_newline() {
        let (result, dest, _) = capture(settings(1), &[(0, "line\n")]);
        assert!(matches!(result.unwrap(), CaptureOutcome::Completed(ref s) if s.chars == 5));
        assert_eq!(dest, b"line\n");
    }

    #[test]
    fn test_abort_key_first_aborts() {
        let (mut session, _) = session(settings(3), &[(500, "\x1babc")]);
        let mut dest = Vec::new();
        let mut outcome = None;
        while outcome.is_none() {
            outcome = session.step(&mut dest, &mut io::sink()).unwrap();
        }
        assert_eq!(outcome, Some(CaptureOutcome::AbortedEarly));
        assert_eq!(session.phase(), Phase::AbortedEarly);
        assert!(dest.is_empty());
    }

    #[test]
    fn test_abort_key_after_transmission_is_content() {
        let mut s = settings(2);
        s.raw_text = true;
        let (result, dest, _) = capture(s, &[(0, "abcd\x1b")]);
        match result.unwrap() {
            CaptureOutcome::Completed(stats) => assert_eq!(stats.chars, 5),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(dest, b"abcd\x1b");
    }

    #[test]
    fn test_waits_indefinitely_for_first_input() {
        let (mut session, clock) = session(settings(1), &[]);
        let start = clock.now();
        let mut dest = Vec::new();
        for _ in 0..10_000 {
            assert!(session.step(&mut dest, &mut io::sink()).unwrap().is_none());
        }
        assert_eq!(session.phase(), Phase::AwaitingFirstInput);
        assert!(clock.now() - start > Duration::from_secs(60));
        assert!(dest.is_empty());
    }

    #[test]
    fn test_idle_clock_resets_on_each_character() {
        // Gaps just under the timeout keep the session alive
        let mut s = settings(3);
        s.raw_text = true;
        let (result, dest, _) = capture(s, &[(0, "a"), (2900, "b"), (5800, "c")]);
        match result.unwrap() {
            CaptureOutcome::Completed(stats) => {
                assert_eq!(stats.elapsed, Duration::from_millis(5800));
                assert_eq!(stats.chars, 3);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(dest, b"abc");
    }

    #[test]
    fn test_timeout_requires_strictly_greater_idle() {
        let mut s = settings(3);
        s.poll_interval = Duration::from_secs(1);
        let (mut session, clock) = session(s, &[(0, "x")]);
        let start = clock.now();
        let mut dest = Vec::new();

        // Accept at t=0, then idle checks at t=1, 2, 3
        for _ in 0..4 {
            assert!(session.step(&mut dest, &mut io::sink()).unwrap().is_none());
        }
        assert_eq!(clock.now() - start, Duration::from_secs(3));
        assert_eq!(session.phase(), Phase::Receiving);

        let outcome = session.step(&mut dest, &mut io::sink()).unwrap();
        assert!(matches!(outcome, Some(CaptureOutcome::Completed(_))));
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(dest, b"x\n");
    }

    #[test]
    fn test_echo_mirrors_accepted_characters() {
        let mut s = settings(1);
        s.echo = true;
        let (result, dest, echo) = capture(s, &[(0, "hé!")]);
        assert!(result.is_ok());
        assert_eq!(dest, "hé!\n".as_bytes());
        assert_eq!(echo, "hé!\n".as_bytes());
    }

    #[test]
    fn test_char_count_matches_file_contents() {
        let text = "The quick, brown fox: jumps!  Over \"the\" lazy dog?\n";
        let (result, dest, _) = capture(settings(1), &[(0, text)]);
        match result.unwrap() {
            CaptureOutcome::Completed(stats) => {
                let written = String::from_utf8(dest).unwrap();
                assert_eq!(stats.chars, written.chars().count() as u64);
                assert_eq!(stats.words_actual, 9);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_write_failure_is_io_error() {
        let (session, _) = session(settings(1), &[(0, "abc")]);
        let err = session.run(&mut FailingWriter, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CaptureError::Io(_)));
    }

    #[test]
    fn test_read_failure_is_io_error() {
        let (mut session, _) = session(settings(1), &[(0, "abc")]);
        session.source.fail_read = true;
        let mut dest = Vec::new();
        let err = session.run(&mut dest, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CaptureError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert!(dest.is_empty());
    }

    #[test]
    fn test_interrupt_stops_receiving_without_touching_file() {
        let s = settings(3);
        let interrupt = Arc::clone(&s.interrupt);
        let (mut session, _) = session(s, &[(0, "ab"), (1000, "cd")]);
        let mut dest = Vec::new();

        for _ in 0..2 {
            assert!(session.step(&mut dest, &mut io::sink()).unwrap().is_none());
        }
        assert_eq!(session.phase(), Phase::Receiving);

        interrupt.store(true, Ordering::SeqCst);
        let err = session.run(&mut dest, &mut io::sink()).unwrap_err();
        assert!(matches!(err, CaptureError::Interrupted));
        assert_eq!(err.exit_code(), 130);
        assert_eq!(dest, b"ab");
    }

    #[test]
    #[should_panic(expected = "already finished")]
    fn test_step_after_completion_panics() {
        let (mut session, _) = session(settings(1), &[(0, "x")]);
        let mut dest = Vec::new();
        while session.step(&mut dest, &mut io::sink()).unwrap().is_none() {}
        let _ = session.step(&mut dest, &mut io::sink());
    }

    /// Collects everything written to it, from any clone
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_lines_never_split_echoed_text() {
        let terminal = SharedBuf::default();
        let log_writer = terminal.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || log_writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_target(false)
            .without_time()
            .finish();

        let mut s = settings(1);
        s.echo = true;
        let (session, _) = session(s, &[(0, "hi there.")]);
        let mut dest = Vec::new();
        let mut echo = terminal.clone();
        let result = tracing::subscriber::with_default(subscriber, || session.run(&mut dest, &mut echo));
        assert!(result.is_ok());

        let output = String::from_utf8(terminal.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines.contains(&"hi there."), "{}", output);
        let started = lines.iter().position(|l| l.contains("Transmission started")).unwrap();
        let complete = lines.iter().position(|l| l.contains("Transmission complete")).unwrap();
        let echoed = lines.iter().position(|l| *l == "hi there.").unwrap();
        assert!(started < echoed && echoed < complete, "{}", output);
        for line in lines.iter().filter(|l| l.contains("INFO")) {
            assert!(line.trim_start().starts_with("INFO"), "{}", output);
        }
    }
}
