//! Error types for the test execution engine
//!
//! Splits batch-level failures from errors recorded inside tests.

use std::any::Any;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to resolve or evaluate a module through the loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module `{0}` is not registered with the loader")]
    NotFound(PathBuf),

    #[error("module `{path}` failed to load: {message}")]
    Failed { path: PathBuf, message: String },
}

/// Batch-level failures surfaced through `on_failure` or fatal to the run.
///
/// Test and hook failures are never represented here; they are recorded as
/// outcomes inside the file's report.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The test file could not be loaded; no report is produced for it.
    #[error("failed to load test module: {0}")]
    Load(#[from] LoadError),

    /// A project setup file failed during context bootstrap.
    #[error("setup file `{path}` failed: {message}")]
    Setup { path: PathBuf, message: String },

    /// The configured test name pattern is not a valid regular expression.
    #[error("invalid test name pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },

    /// An execution context died outside of normal test failure reporting.
    #[error("execution context crashed: {0}")]
    ContextCrash(String),

    /// The worker pool could not be created, used, or torn down.
    #[error("worker pool failure: {0}")]
    Pool(String),
}

/// An error captured from a test body, hook, or suppressed assertion.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TestError {
    message: String,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert a caught panic payload into a recorded error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test body panicked with a non-string payload".to_string()
        };
        Self::new(message)
    }
}

impl From<String> for TestError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TestError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
