//! Assertion-library state interface
//!
//! The engine consumes the assertion library through this state handle:
//! it clears and collects suppressed errors around each test, publishes the
//! current test name, and binds the active snapshot store. Matching logic
//! itself lives outside the engine.

use std::mem;
use std::sync::{Arc, Mutex};

use crate::error::TestError;
use crate::snapshot::SnapshotHandle;

/// Mutable assertion state scoped to one execution context.
#[derive(Default)]
pub struct MatcherState {
    /// Errors raised by fire-and-forget assertion calls outside the throw
    /// path; collected after the body settles and able to fail the test.
    pub suppressed_errors: Vec<TestError>,

    /// Full name of the test currently executing.
    pub current_test_name: Option<String>,

    /// Snapshot store bound for the file currently running.
    pub snapshot: Option<SnapshotHandle>,
}

/// Shared handle to the context's matcher state.
#[derive(Clone, Default)]
pub struct ExpectState {
    inner: Arc<Mutex<MatcherState>>,
}

impl ExpectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a partial update to the state.
    pub fn set_state(&self, f: impl FnOnce(&mut MatcherState)) {
        f(&mut self.inner.lock().unwrap());
    }

    /// Read from the state.
    pub fn with_state<R>(&self, f: impl FnOnce(&MatcherState) -> R) -> R {
        f(&self.inner.lock().unwrap())
    }

    pub fn push_suppressed_error(&self, error: TestError) {
        self.inner.lock().unwrap().suppressed_errors.push(error);
    }

    pub fn take_suppressed_errors(&self) -> Vec<TestError> {
        mem::take(&mut self.inner.lock().unwrap().suppressed_errors)
    }

    pub fn current_test_name(&self) -> Option<String> {
        self.inner.lock().unwrap().current_test_name.clone()
    }

    pub fn bind_snapshot(&self, handle: SnapshotHandle) {
        self.inner.lock().unwrap().snapshot = Some(handle);
    }

    pub fn unbind_snapshot(&self) -> Option<SnapshotHandle> {
        self.inner.lock().unwrap().snapshot.take()
    }

    pub fn snapshot(&self) -> Option<SnapshotHandle> {
        self.inner.lock().unwrap().snapshot.clone()
    }
}
