//! Unit-test log stream parser.
//!
//! Starts a remote test run and scans its output line by line until the four
//! summary markers have been seen. The state machine only moves forward:
//! `Scanning -> Complete` or `Scanning -> Failed`.

use serialcheck_io::{PROMPT, TransportError, TransportSession};
use std::io::{Read, Write};
use std::time::Duration;

use super::markers::MarkerAccumulator;
use super::sanitize::LogLine;
use crate::error::{SessionError, StreamEnd};
use crate::report::TestRunResult;

pub const UNIT_TESTS_COMMAND: &[u8] = b"unit_tests\r";
pub const LINE_DELIMITER: &[u8] = b"\r\n";

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Deadline for each log line. Tests can be quiet for a while.
    pub line_timeout: Duration,
    /// Deadline for the trailing prompt once all markers are in.
    pub drain_timeout: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            line_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub enum ParseState {
    Scanning(MarkerAccumulator),
    Complete(MarkerAccumulator),
    Failed(SessionError),
}

impl ParseState {
    pub fn name(&self) -> &'static str {
        match self {
            ParseState::Scanning(_) => "SCANNING",
            ParseState::Complete(_) => "COMPLETE",
            ParseState::Failed(_) => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ParseState::Scanning(_))
    }
}

/// Advance the scan by one read.
pub fn step(acc: MarkerAccumulator, read: Result<Vec<u8>, TransportError>) -> ParseState {
    let bytes = match read {
        Ok(bytes) => bytes,
        Err(TransportError::Timeout { .. }) => {
            return ParseState::Failed(acc.into_parse_error(StreamEnd::Timeout));
        }
        Err(TransportError::Closed) => {
            return ParseState::Failed(acc.into_parse_error(StreamEnd::Closed));
        }
        Err(e) => {
            tracing::error!("Error reading output: {}", e);
            return ParseState::Failed(e.into());
        }
    };

    let line = LogLine::capture(&bytes);
    tracing::info!("{}", line.sanitized);

    match acc.absorb(&line) {
        Ok(acc) if acc.is_complete() => ParseState::Complete(acc),
        Ok(acc) => ParseState::Scanning(acc),
        Err(e) => ParseState::Failed(e),
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogStreamParser {
    config: ParserConfig,
}

impl LogStreamParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Run the remote suite and collect its summary. The session is consumed
    /// and closed whatever the outcome.
    pub fn run<S: Read + Write>(
        &self,
        mut session: TransportSession<S>,
    ) -> Result<TestRunResult, SessionError> {
        let outcome = self.scan(&mut session);
        session.close();
        outcome
    }

    fn scan<S: Read + Write>(
        &self,
        session: &mut TransportSession<S>,
    ) -> Result<TestRunResult, SessionError> {
        session.set_timeout(self.config.line_timeout);

        tracing::info!("Running unit tests");
        session.write(UNIT_TESTS_COMMAND)?;
        tracing::info!("Waiting for unit tests to complete");

        let mut acc = MarkerAccumulator::new();
        loop {
            let state = step(acc, session.read_until(LINE_DELIMITER, false));
            if state.is_terminal() {
                tracing::debug!("Parser reached {}", state.name());
            }
            match state {
                ParseState::Scanning(next) => acc = next,
                ParseState::Complete(done) => return self.complete(session, done),
                ParseState::Failed(e) => return Err(e),
            }
        }
    }

    fn complete<S: Read + Write>(
        &self,
        session: &mut TransportSession<S>,
        acc: MarkerAccumulator,
    ) -> Result<TestRunResult, SessionError> {
        session.set_timeout(self.config.drain_timeout);

        // Best effort: a missing prompt does not invalidate the markers.
        let acc = match session.read_until(PROMPT, false) {
            Ok(rest) => acc.with_remainder(&rest),
            Err(e) => {
                tracing::debug!("Trailing drain skipped: {}", e);
                acc
            }
        };

        acc.finish()
    }
}
