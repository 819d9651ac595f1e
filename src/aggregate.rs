//! Result aggregation
//!
//! Converts raw stats and outcomes into the normalized per-file report and
//! runs the snapshot bookkeeping sequence against the bound store.

use chrono::Utc;

use crate::execution::{RunStats, TestOutcome};
use crate::models::{
    PerfStats, SnapshotSummary, TestFile, TestFileReport, TestRecord, TestStatus,
    UpdateSnapshotMode,
};
use crate::snapshot::SnapshotHandle;

/// Package one file's outcomes into the external report shape.
pub fn to_report(
    stats: &RunStats,
    outcomes: Vec<TestOutcome>,
    file: &TestFile,
    snapshot: SnapshotSummary,
    coverage: Option<serde_json::Value>,
) -> TestFileReport {
    let runtime = stats.runtime().unwrap_or_default();
    let runtime_ms = (runtime.as_secs_f64() * 1000.0).round() as u64;
    let slow = runtime.as_secs_f64() > file.config.slow_test_threshold;

    let failures: Vec<String> = outcomes
        .iter()
        .filter(|outcome| !outcome.errors.is_empty())
        .map(render_failure)
        .collect();
    let failure_message = if failures.is_empty() {
        None
    } else {
        Some(failures.join("\n"))
    };

    let test_results = outcomes
        .into_iter()
        .map(|outcome| {
            let status = if outcome.skipped {
                TestStatus::Pending
            } else if !outcome.errors.is_empty() {
                TestStatus::Failed
            } else {
                TestStatus::Passed
            };
            let failure_messages = if outcome.errors.is_empty() {
                Vec::new()
            } else {
                vec![render_failure(&outcome)]
            };
            TestRecord {
                full_name: outcome.full_name(),
                status,
                duration_ms: outcome.duration.map(|d| d.as_secs_f64() * 1000.0),
                failure_messages,
                ancestor_titles: outcome.ancestors,
                title: outcome.title,
            }
        })
        .collect();

    TestFileReport {
        test_file_path: file.path.clone(),
        num_passing_tests: stats.passes,
        num_failing_tests: stats.failures,
        num_pending_tests: stats.pending,
        test_results,
        failure_message,
        snapshot,
        perf: PerfStats {
            started_at: stats.started_at.unwrap_or_else(Utc::now),
            finished_at: stats.finished_at.unwrap_or_else(Utc::now),
            runtime_ms,
            slow,
        },
        coverage,
    }
}

/// Snapshot bookkeeping for one finished file run.
///
/// Every outcome is marked checked, pending and failing ones included, so
/// their snapshots are not flagged obsolete. Unchecked keys are captured
/// before removal; the reported count is read after save and collapses to
/// zero when the whole file was deleted.
pub fn finalize_snapshot(
    store: &SnapshotHandle,
    outcomes: &[TestOutcome],
    update: UpdateSnapshotMode,
) -> SnapshotSummary {
    let mut store = store.lock().unwrap();

    for outcome in outcomes {
        store.mark_checked(&outcome.full_name());
    }

    let unchecked_keys = store.unchecked_keys();
    if update == UpdateSnapshotMode::All {
        store.remove_unchecked();
    }

    let status = store.save();
    SnapshotSummary {
        added: status.added,
        matched: status.matched,
        unmatched: status.unmatched,
        updated: status.updated,
        unchecked: if status.deleted {
            0
        } else {
            store.unchecked_count() as u32
        },
        unchecked_keys: if status.deleted {
            Vec::new()
        } else {
            unchecked_keys
        },
        file_deleted: status.deleted,
    }
}

fn render_failure(outcome: &TestOutcome) -> String {
    let mut path: Vec<&str> = outcome.ancestors.iter().map(String::as_str).collect();
    path.push(&outcome.title);

    let rendered: Vec<String> = outcome
        .errors
        .iter()
        .map(|error| indent(&error.to_string()))
        .collect();

    format!("{}\n{}\n", path.join(" > "), rendered.join("\n"))
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::error::TestError;
    use crate::models::ProjectConfig;
    use crate::snapshot::{MemorySnapshotBackend, SnapshotBackend};

    fn file_with_threshold(seconds: f64) -> TestFile {
        TestFile::new(
            "suite.test",
            Arc::new(ProjectConfig::new("p").with_slow_test_threshold(seconds)),
        )
    }

    fn passed(full: &str) -> TestOutcome {
        TestOutcome {
            ancestors: Vec::new(),
            title: full.to_string(),
            duration: Some(Duration::from_micros(1500)),
            errors: Vec::new(),
            skipped: false,
        }
    }

    fn finished_stats() -> RunStats {
        let mut stats = RunStats::new();
        stats.begin();
        stats.finish();
        stats
    }

    #[test]
    fn statuses_derive_from_outcome_shape() {
        let mut stats = finished_stats();
        stats.passes = 1;
        stats.failures = 1;
        stats.pending = 1;

        let outcomes = vec![
            passed("ok"),
            TestOutcome {
                ancestors: vec!["A".to_string()],
                title: "bad".to_string(),
                duration: Some(Duration::from_millis(2)),
                errors: vec![TestError::new("boom")],
                skipped: false,
            },
            TestOutcome::skipped(vec!["A".to_string()], "later"),
        ];

        let report = to_report(
            &stats,
            outcomes,
            &file_with_threshold(5.0),
            SnapshotSummary::default(),
            None,
        );

        assert_eq!(report.test_results[0].status, TestStatus::Passed);
        assert_eq!(report.test_results[1].status, TestStatus::Failed);
        assert_eq!(report.test_results[2].status, TestStatus::Pending);
        assert_eq!(report.test_results[1].full_name, "A bad");
        assert!(report.test_results[2].duration_ms.is_none());
        assert_eq!(report.total_tests(), 3);
    }

    #[test]
    fn failure_messages_are_pathed_and_indented() {
        let mut stats = finished_stats();
        stats.failures = 1;

        let outcome = TestOutcome {
            ancestors: vec!["auth".to_string(), "login".to_string()],
            title: "rejects bad password".to_string(),
            duration: Some(Duration::from_millis(1)),
            errors: vec![TestError::new("expected 401\ngot 200")],
            skipped: false,
        };

        let report = to_report(
            &stats,
            vec![outcome],
            &file_with_threshold(5.0),
            SnapshotSummary::default(),
            None,
        );

        let message = report.failure_message.unwrap();
        assert!(message.starts_with("auth > login > rejects bad password\n"));
        assert!(message.contains("    expected 401\n    got 200"));
        assert_eq!(report.test_results[0].failure_messages.len(), 1);
    }

    #[test]
    fn sub_millisecond_duration_precision_is_kept() {
        let stats = finished_stats();
        let report = to_report(
            &stats,
            vec![passed("quick")],
            &file_with_threshold(5.0),
            SnapshotSummary::default(),
            None,
        );
        let duration_ms = report.test_results[0].duration_ms.unwrap();
        assert!((duration_ms - 1.5).abs() < 1e-9);
    }

    #[test]
    fn slow_flag_uses_the_project_threshold() {
        let stats = finished_stats();
        // A freshly measured runtime is far below any sane threshold.
        let report = to_report(
            &stats,
            Vec::new(),
            &file_with_threshold(5.0),
            SnapshotSummary::default(),
            None,
        );
        assert!(!report.perf.slow);

        let report = to_report(
            &stats,
            Vec::new(),
            &file_with_threshold(0.0),
            SnapshotSummary::default(),
            None,
        );
        assert!(report.perf.slow);
    }

    #[test]
    fn coverage_passes_through_unmodified() {
        let stats = finished_stats();
        let payload = json!({"lines": {"covered": 10}});
        let report = to_report(
            &stats,
            Vec::new(),
            &file_with_threshold(5.0),
            SnapshotSummary::default(),
            Some(payload.clone()),
        );
        assert_eq!(report.coverage, Some(payload));
    }

    fn open_handle(
        backend: &MemorySnapshotBackend,
        path: &Path,
        update: UpdateSnapshotMode,
    ) -> SnapshotHandle {
        Arc::new(Mutex::new(backend.open(path, update, Vec::new())))
    }

    #[test]
    fn unchecked_keys_survive_unless_removed() {
        let backend = MemorySnapshotBackend::new();
        let path = Path::new("a.snap");
        backend.seed(
            path,
            [
                ("used 1".to_string(), "x".to_string()),
                ("stale 1".to_string(), "y".to_string()),
                ("stale 2".to_string(), "z".to_string()),
            ],
        );

        let handle = open_handle(&backend, path, UpdateSnapshotMode::New);
        handle
            .lock()
            .unwrap()
            .match_value("used", &json!("x value"));

        let summary = finalize_snapshot(&handle, &[passed("used")], UpdateSnapshotMode::New);
        assert_eq!(summary.unchecked, 2);
        assert_eq!(summary.unchecked_keys, vec!["stale 1", "stale 2"]);
        assert!(!summary.file_deleted);
    }

    #[test]
    fn update_all_removes_unchecked_keys() {
        let backend = MemorySnapshotBackend::new();
        let path = Path::new("a.snap");
        backend.seed(
            path,
            [
                ("used 1".to_string(), "x".to_string()),
                ("stale 1".to_string(), "y".to_string()),
            ],
        );

        let handle = open_handle(&backend, path, UpdateSnapshotMode::All);
        let summary = finalize_snapshot(&handle, &[passed("used")], UpdateSnapshotMode::All);

        // Captured before removal, counted after.
        assert_eq!(summary.unchecked_keys, vec!["stale 1"]);
        assert_eq!(summary.unchecked, 0);
        let entries = backend.entries(path).unwrap();
        assert!(entries.contains_key("used 1"));
        assert!(!entries.contains_key("stale 1"));
    }

    #[test]
    fn deleting_the_file_resets_unchecked_reporting() {
        let backend = MemorySnapshotBackend::new();
        let path = Path::new("a.snap");
        backend.seed(path, [("stale 1".to_string(), "y".to_string())]);

        let handle = open_handle(&backend, path, UpdateSnapshotMode::All);
        let summary = finalize_snapshot(&handle, &[], UpdateSnapshotMode::All);

        assert!(summary.file_deleted);
        assert_eq!(summary.unchecked, 0);
        assert!(summary.unchecked_keys.is_empty());
        assert!(backend.entries(path).is_none());
    }

    #[test]
    fn pending_and_failing_tests_are_marked_checked() {
        let backend = MemorySnapshotBackend::new();
        let path = Path::new("a.snap");
        backend.seed(
            path,
            [
                ("failing 1".to_string(), "x".to_string()),
                ("pending 1".to_string(), "y".to_string()),
            ],
        );

        let outcomes = vec![
            TestOutcome {
                ancestors: Vec::new(),
                title: "failing".to_string(),
                duration: Some(Duration::from_millis(1)),
                errors: vec![TestError::new("boom")],
                skipped: false,
            },
            TestOutcome::skipped(Vec::new(), "pending"),
        ];

        let handle = open_handle(&backend, path, UpdateSnapshotMode::New);
        let summary = finalize_snapshot(&handle, &outcomes, UpdateSnapshotMode::New);
        assert_eq!(summary.unchecked, 0);
    }
}
