//! Run configuration models
//!
//! Defines per-project and runner-wide configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How snapshot mismatches and new snapshots are handled during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSnapshotMode {
    /// Rewrite mismatched snapshots and drop unchecked keys.
    All,
    /// Write snapshots for new keys only.
    #[default]
    New,
    /// Never write; new or mismatched snapshots fail the test.
    None,
}

/// Per-project configuration shared by every test file of that project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project display name, also the pool key for this config.
    pub name: String,

    /// Setup modules loaded once per execution context, in order.
    pub setup_files: Vec<PathBuf>,

    /// Setup modules loaded after the environment setup, in order.
    pub setup_files_after_env: Vec<PathBuf>,

    /// Snapshot serializer modules; the last declared wins on match priority.
    pub snapshot_serializers: Vec<PathBuf>,

    /// Case-insensitive pattern applied to full test names.
    pub test_name_pattern: Option<String>,

    /// Snapshot update policy for this project.
    pub update_snapshot: UpdateSnapshotMode,

    /// Threshold in seconds above which a file run is flagged slow.
    pub slow_test_threshold: f64,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            setup_files: Vec::new(),
            setup_files_after_env: Vec::new(),
            snapshot_serializers: Vec::new(),
            test_name_pattern: None,
            update_snapshot: UpdateSnapshotMode::default(),
            slow_test_threshold: 5.0,
        }
    }
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_setup_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.setup_files.push(path.into());
        self
    }

    pub fn with_setup_file_after_env(mut self, path: impl Into<PathBuf>) -> Self {
        self.setup_files_after_env.push(path.into());
        self
    }

    pub fn with_snapshot_serializer(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_serializers.push(path.into());
        self
    }

    pub fn with_test_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.test_name_pattern = Some(pattern.into());
        self
    }

    pub fn with_update_snapshot(mut self, mode: UpdateSnapshotMode) -> Self {
        self.update_snapshot = mode;
        self
    }

    pub fn with_slow_test_threshold(mut self, seconds: f64) -> Self {
        self.slow_test_threshold = seconds;
        self
    }

    /// Load configuration from a YAML or JSON file, keyed on the extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to a YAML or JSON file, keyed on the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

/// Runner-wide configuration owned by the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of files concurrently in flight; 1 selects the
    /// in-band single-context executor.
    pub max_workers: usize,

    /// Forward the context's coverage payload into each report.
    pub collect_coverage: bool,

    /// Seconds to wait for workers to drain before aborting them.
    pub shutdown_grace_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            collect_coverage: false,
            shutdown_grace_secs: 5,
        }
    }
}

impl RunnerConfig {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Self::default()
        }
    }

    pub fn with_coverage(mut self, collect: bool) -> Self {
        self.collect_coverage = collect;
        self
    }

    pub fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    /// Load configuration from a YAML or JSON file, keyed on the extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if is_yaml(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

/// A test file scheduled for execution, bound to its project configuration.
#[derive(Clone, Debug)]
pub struct TestFile {
    pub path: PathBuf,
    pub config: Arc<ProjectConfig>,
}

impl TestFile {
    pub fn new(path: impl Into<PathBuf>, config: Arc<ProjectConfig>) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}
