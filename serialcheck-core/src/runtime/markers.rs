//! Line classification and marker accumulation.
//!
//! Each line goes through an ordered rule table. Rules are independent: one
//! line may count as a finished test and carry a marker at the same time.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use super::sanitize::LogLine;
use crate::error::{SessionError, StreamEnd};
use crate::report::TestRunResult;

/// Remote reply to an unknown command.
pub const COMMAND_NOT_FOUND: &str = "command not found,";

/// Call-site notation printed once per finished test.
pub const TEST_COMPLETED: &str = "()";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarkerKind {
    FailedTests,
    ElapsedTime,
    Leak,
    Status,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 4] = [
        MarkerKind::FailedTests,
        MarkerKind::ElapsedTime,
        MarkerKind::Leak,
        MarkerKind::Status,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            MarkerKind::FailedTests => "Failed tests: ",
            MarkerKind::ElapsedTime => "Consumed: ",
            MarkerKind::Leak => "Leaked: ",
            MarkerKind::Status => "Status: ",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    fn pattern(self) -> &'static Regex {
        static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                Regex::new(r"^Failed tests: \d+").expect("Invalid Failed Tests Regex"),
                Regex::new(r"^Consumed: \d+").expect("Invalid Consumed Regex"),
                Regex::new(r"^Leaked: -?\d+").expect("Invalid Leaked Regex"),
                Regex::new(r"^Status: [A-Za-z]{3,}").expect("Invalid Status Regex"),
            ]
        });
        &patterns[self.slot()]
    }
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix().trim_end_matches([':', ' ']))
    }
}

/// The text a marker pattern matched, kept verbatim until post-processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedMarker {
    pub kind: MarkerKind,
    pub text: String,
}

impl CapturedMarker {
    /// Everything after the fixed prefix.
    pub fn value(&self) -> &str {
        self.text
            .strip_prefix(self.kind.prefix())
            .unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    CommandNotFound,
    TestCompleted,
    Marker(CapturedMarker),
}

struct LineRule {
    name: &'static str,
    extract: fn(&str) -> Option<LineKind>,
}

fn command_not_found(line: &str) -> Option<LineKind> {
    line.contains(COMMAND_NOT_FOUND)
        .then_some(LineKind::CommandNotFound)
}

fn test_completed(line: &str) -> Option<LineKind> {
    line.contains(TEST_COMPLETED).then_some(LineKind::TestCompleted)
}

fn marker(kind: MarkerKind, line: &str) -> Option<LineKind> {
    kind.pattern().find(line.trim_start()).map(|m| {
        LineKind::Marker(CapturedMarker {
            kind,
            text: m.as_str().to_string(),
        })
    })
}

static RULES: [LineRule; 6] = [
    LineRule {
        name: "command-not-found",
        extract: command_not_found,
    },
    LineRule {
        name: "test-completed",
        extract: test_completed,
    },
    LineRule {
        name: "failed-tests",
        extract: |line| marker(MarkerKind::FailedTests, line),
    },
    LineRule {
        name: "elapsed-time",
        extract: |line| marker(MarkerKind::ElapsedTime, line),
    },
    LineRule {
        name: "leak",
        extract: |line| marker(MarkerKind::Leak, line),
    },
    LineRule {
        name: "status",
        extract: |line| marker(MarkerKind::Status, line),
    },
];

/// Every kind the line matches, in rule order.
pub fn classify(line: &str) -> Vec<LineKind> {
    RULES
        .iter()
        .filter_map(|rule| {
            let kind = (rule.extract)(line)?;
            tracing::trace!(rule = rule.name, "matched {:?}", line);
            Some(kind)
        })
        .collect()
}

/// State threaded through the scan loop, one line at a time.
#[derive(Debug, Clone, Default)]
pub struct MarkerAccumulator {
    markers: [Option<CapturedMarker>; 4],
    total_tests: u64,
    transcript: Vec<String>,
}

impl MarkerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one line in. A "command not found" reply is fatal.
    pub fn absorb(mut self, line: &LogLine) -> Result<Self, SessionError> {
        for kind in classify(&line.sanitized) {
            match kind {
                LineKind::CommandNotFound => {
                    tracing::error!("Command not found: {}", line.sanitized);
                    return Err(SessionError::Protocol {
                        line: line.sanitized.clone(),
                    });
                }
                LineKind::TestCompleted => {
                    self.total_tests += 1;
                    tracing::debug!("Test completed: {}", line.sanitized);
                }
                LineKind::Marker(found) => {
                    let slot = &mut self.markers[found.kind.slot()];
                    if slot.is_none() {
                        tracing::debug!("Captured {} marker: {}", found.kind, found.text);
                        *slot = Some(found);
                    }
                }
            }
        }

        self.transcript.push(line.transcript_entry());
        Ok(self)
    }

    /// Append whatever trailed the last marker line.
    pub fn with_remainder(mut self, bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        self.transcript.extend(
            text.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| LogLine::capture(l.as_bytes()).transcript_entry()),
        );
        self
    }

    pub fn is_complete(&self) -> bool {
        self.markers.iter().all(Option::is_some)
    }

    pub fn total_tests(&self) -> u64 {
        self.total_tests
    }

    pub fn marker(&self, kind: MarkerKind) -> Option<&CapturedMarker> {
        self.markers[kind.slot()].as_ref()
    }

    pub fn found(&self) -> Vec<CapturedMarker> {
        self.markers.iter().flatten().cloned().collect()
    }

    pub fn missing(&self) -> Vec<MarkerKind> {
        MarkerKind::ALL
            .into_iter()
            .filter(|k| self.markers[k.slot()].is_none())
            .collect()
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn into_parse_error(self, cause: StreamEnd) -> SessionError {
        let missing = self.missing();
        tracing::error!(
            "Failed to parse output ({}): missing {:?}",
            cause,
            missing
        );
        SessionError::Parse {
            found: self.found(),
            missing,
            cause,
        }
    }

    /// Decompose the captured markers into a [`TestRunResult`].
    pub fn finish(self) -> Result<TestRunResult, SessionError> {
        if !self.is_complete() {
            return Err(self.into_parse_error(StreamEnd::Closed));
        }

        let failed_tests = self.number::<u64>(MarkerKind::FailedTests)?;
        let elapsed_time_ms = self.number::<u64>(MarkerKind::ElapsedTime)?;
        let leak_bytes = self.number::<i64>(MarkerKind::Leak)?;
        let status = self.status()?;

        Ok(TestRunResult::new(
            self.total_tests,
            failed_tests,
            elapsed_time_ms,
            leak_bytes,
            status,
            self.transcript.join("\n"),
        ))
    }

    fn captured(&self, kind: MarkerKind) -> Result<&CapturedMarker, SessionError> {
        self.marker(kind).ok_or_else(|| SessionError::Parse {
            found: self.found(),
            missing: vec![kind],
            cause: StreamEnd::Closed,
        })
    }

    fn number<T: std::str::FromStr>(&self, kind: MarkerKind) -> Result<T, SessionError> {
        static NUMBER: OnceLock<Regex> = OnceLock::new();
        let number = NUMBER.get_or_init(|| Regex::new(r"-?\d+").expect("Invalid Number Regex"));

        let captured = self.captured(kind)?;
        number
            .find(captured.value())
            .and_then(|m| m.as_str().parse::<T>().ok())
            .ok_or_else(|| SessionError::MalformedMarker {
                kind,
                text: captured.text.clone(),
            })
    }

    fn status(&self) -> Result<String, SessionError> {
        static WORD: OnceLock<Regex> = OnceLock::new();
        let word = WORD.get_or_init(|| Regex::new(r"[A-Za-z]+").expect("Invalid Word Regex"));

        let captured = self.captured(MarkerKind::Status)?;
        word.find(captured.value())
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SessionError::MalformedMarker {
                kind: MarkerKind::Status,
                text: captured.text.clone(),
            })
    }
}
