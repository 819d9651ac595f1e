//! Normalized per-file result models
//!
//! The external contract produced for every executed test file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Final status of a single test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Pending,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Pending => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Result of one test within a file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestRecord {
    /// Enclosing suite names from the root (exclusive) inward.
    pub ancestor_titles: Vec<String>,

    /// Ancestor titles and test title joined by single spaces.
    pub full_name: String,

    pub title: String,
    pub status: TestStatus,

    /// Body wall-clock time in milliseconds, sub-millisecond precision.
    pub duration_ms: Option<f64>,

    /// Empty unless the test failed, then exactly one composite message.
    pub failure_messages: Vec<String>,
}

/// Snapshot bookkeeping folded into the file report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub added: u32,
    pub matched: u32,
    pub unmatched: u32,
    pub updated: u32,
    pub unchecked: u32,
    pub unchecked_keys: Vec<String>,
    pub file_deleted: bool,
}

/// Timing for the whole file run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerfStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Wall-clock runtime rounded to millisecond granularity.
    pub runtime_ms: u64,

    /// True when the runtime exceeded the project's slow-test threshold.
    pub slow: bool,
}

/// The normalized result record for one test file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestFileReport {
    pub test_file_path: PathBuf,

    pub num_passing_tests: usize,
    pub num_failing_tests: usize,
    pub num_pending_tests: usize,

    pub test_results: Vec<TestRecord>,

    /// All per-test failure composites joined, `None` when nothing failed.
    pub failure_message: Option<String>,

    pub snapshot: SnapshotSummary,
    pub perf: PerfStats,

    /// Opaque instrumentation payload, passed through unmodified.
    pub coverage: Option<serde_json::Value>,
}

impl TestFileReport {
    pub fn total_tests(&self) -> usize {
        self.num_passing_tests + self.num_failing_tests + self.num_pending_tests
    }

    pub fn is_success(&self) -> bool {
        self.num_failing_tests == 0 && self.failure_message.is_none()
    }
}

impl fmt::Display for TestFileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} passed, {} failed, {} pending [{}ms]",
            self.test_file_path.display(),
            self.num_passing_tests,
            self.num_failing_tests,
            self.num_pending_tests,
            self.perf.runtime_ms
        )?;
        if self.perf.slow {
            write!(f, " (slow)")?;
        }
        Ok(())
    }
}
