//! Run statistics and raw outcomes
//!
//! Accumulated while one file's tree executes, consumed by the aggregator.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::error::TestError;
use crate::execution::filter::full_name;
use crate::suite::HookKind;

/// Mutable counters for one file execution.
#[derive(Debug, Default)]
pub struct RunStats {
    pub passes: usize,
    pub failures: usize,
    pub pending: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    timer: Option<Instant>,
    runtime: Option<Duration>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        self.started_at = Some(Utc::now());
        self.timer = Some(Instant::now());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.runtime = self.timer.map(|timer| timer.elapsed());
    }

    pub fn total(&self) -> usize {
        self.passes + self.failures + self.pending
    }

    pub fn runtime(&self) -> Option<Duration> {
        self.runtime
    }
}

/// Recorded result of one test or one failed hook invocation.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    /// Enclosing suite names from the root (exclusive) inward.
    pub ancestors: Vec<String>,
    pub title: String,

    /// Body wall-clock time; `None` for skipped tests and hook outcomes.
    pub duration: Option<Duration>,

    pub errors: Vec<TestError>,
    pub skipped: bool,
}

impl TestOutcome {
    pub fn skipped(ancestors: Vec<String>, title: impl Into<String>) -> Self {
        Self {
            ancestors,
            title: title.into(),
            duration: None,
            errors: Vec::new(),
            skipped: true,
        }
    }

    pub fn hook_failure(ancestors: Vec<String>, kind: HookKind, error: TestError) -> Self {
        Self {
            ancestors,
            title: format!("({kind})"),
            duration: None,
            errors: vec![error],
            skipped: false,
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.ancestors, &self.title)
    }
}
