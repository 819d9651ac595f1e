//! Mock-function and fake-clock facilities
//!
//! Bound to every context handle at bootstrap so test code can create
//! call-recording functions and advance a manual clock.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call-recording mock function.
#[derive(Clone, Default)]
pub struct MockFn {
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl MockFn {
    pub fn call(&self, args: Vec<Value>) {
        self.calls.lock().unwrap().push(args);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// Tracks every mock created within one execution context.
#[derive(Clone, Default)]
pub struct MockRegistry {
    mocks: Arc<Mutex<Vec<MockFn>>>,
}

impl MockRegistry {
    pub fn mock_fn(&self) -> MockFn {
        let mock = MockFn::default();
        self.mocks.lock().unwrap().push(mock.clone());
        mock
    }

    /// Clear recorded calls on every registered mock.
    pub fn clear_all(&self) {
        for mock in self.mocks.lock().unwrap().iter() {
            mock.clear();
        }
    }

    /// Clear recorded calls and forget every registered mock.
    pub fn reset_all(&self) {
        let mut mocks = self.mocks.lock().unwrap();
        for mock in mocks.iter() {
            mock.clear();
        }
        mocks.clear();
    }

    pub fn len(&self) -> usize {
        self.mocks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Manually advanced clock for time-dependent tests.
#[derive(Clone, Default)]
pub struct FakeClock {
    now: Arc<Mutex<Duration>>,
}

impl FakeClock {
    pub fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn reset(&self) {
        *self.now.lock().unwrap() = Duration::ZERO;
    }
}
