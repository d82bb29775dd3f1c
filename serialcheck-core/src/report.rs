//! Structured outcome of a unit-test run, handed to the reporting layer.

use serde::Serialize;

/// Status token the remote suite prints when everything passed.
pub const STATUS_PASSED: &str = "PASSED";

/// Immutable once built; `success` is derived in [`TestRunResult::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRunResult {
    total_tests: u64,
    failed_tests: u64,
    elapsed_time_ms: u64,
    leak_bytes: i64,
    status: String,
    full_output: String,
    success: bool,
}

impl TestRunResult {
    pub fn new(
        total_tests: u64,
        failed_tests: u64,
        elapsed_time_ms: u64,
        leak_bytes: i64,
        status: impl Into<String>,
        full_output: impl Into<String>,
    ) -> Self {
        let status = status.into();
        let success = failed_tests == 0 && status == STATUS_PASSED;
        Self {
            total_tests,
            failed_tests,
            elapsed_time_ms,
            leak_bytes,
            status,
            full_output: full_output.into(),
            success,
        }
    }

    pub fn total_tests(&self) -> u64 {
        self.total_tests
    }

    pub fn failed_tests(&self) -> u64 {
        self.failed_tests
    }

    pub fn elapsed_time_ms(&self) -> u64 {
        self.elapsed_time_ms
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_time_ms as f64 / 1000.0
    }

    /// Reported for information only; never fails a run.
    pub fn leak_bytes(&self) -> i64 {
        self.leak_bytes
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// The sanitized, timestamped transcript.
    pub fn full_output(&self) -> &str {
        &self.full_output
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// One-line summary in CI annotation form.
    pub fn notice_line(&self) -> String {
        format!(
            "::notice:: Total tests: {} Failed tests: {} Status: {} Elapsed time: {} s Memory leak: {} bytes",
            self.total_tests,
            self.failed_tests,
            self.status,
            self.elapsed_secs(),
            self.leak_bytes
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
