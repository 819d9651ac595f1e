//! Execution contexts
//!
//! An execution context hosts file runs one at a time: it bootstraps once,
//! loads each file's declarations, executes the tree, and packages the
//! report. Each context is the single-writer owner of its own cwd shadow,
//! assertion state, serializer list, and mock facilities.

mod bootstrap;
mod cwd;
mod guard;
mod loader;
mod mocks;

pub use cwd::CwdShadow;
pub use guard::{EnvGuard, WORKER_ID_ENV};
pub use loader::{ModuleExport, ModuleLoader, SetupFn, StaticModuleLoader, SuiteFactory};
pub use mocks::{FakeClock, MockFn, MockRegistry};

use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, OnceCell};
use tracing::debug;

use crate::aggregate::{finalize_snapshot, to_report};
use crate::error::{LoadError, RunnerError};
use crate::execution::{run_tree, NamePattern, RunStats};
use crate::expect::ExpectState;
use crate::models::{ProjectConfig, TestFile, TestFileReport, UpdateSnapshotMode};
use crate::snapshot::{SerializerRef, SnapshotBackend, SnapshotHandle};
use crate::suite::DeclarationRegistry;

/// Everything a file needs to run in a context.
#[derive(Clone)]
pub struct RunRequest {
    pub file: TestFile,
    pub update_snapshot: UpdateSnapshotMode,
    pub test_name_pattern: Option<String>,
    pub collect_coverage: bool,
}

impl RunRequest {
    /// Build a request from the file's project configuration.
    pub fn for_file(file: TestFile, collect_coverage: bool) -> Self {
        let update_snapshot = file.config.update_snapshot;
        let test_name_pattern = file.config.test_name_pattern.clone();
        Self {
            file,
            update_snapshot,
            test_name_pattern,
            collect_coverage,
        }
    }
}

/// The context-scoped handle passed to setup functions, hooks, and test
/// bodies. All per-context facilities hang off this single handle; nothing
/// is ambient.
#[derive(Clone)]
pub struct ContextHandle {
    worker_id: usize,
    pub expect: ExpectState,
    pub cwd: Arc<CwdShadow>,
    pub mocks: MockRegistry,
    pub clock: FakeClock,
    pub(crate) serializers: Arc<Mutex<Vec<SerializerRef>>>,
    coverage: Arc<Mutex<Option<serde_json::Value>>>,
}

impl ContextHandle {
    pub(crate) fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            expect: ExpectState::new(),
            cwd: Arc::new(CwdShadow::new()),
            mocks: MockRegistry::default(),
            clock: FakeClock::default(),
            serializers: Arc::new(Mutex::new(Vec::new())),
            coverage: Arc::new(Mutex::new(None)),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Register a serializer with priority over all configured ones. The
    /// registration is rolled back after the current file's run.
    pub fn add_snapshot_serializer(&self, serializer: SerializerRef) {
        self.serializers.lock().unwrap().insert(0, serializer.clone());
        if let Some(store) = self.expect.snapshot() {
            store.lock().unwrap().add_serializer(serializer);
        }
    }

    /// Stash an opaque instrumentation payload for the current file.
    pub fn set_coverage(&self, payload: serde_json::Value) {
        *self.coverage.lock().unwrap() = Some(payload);
    }

    pub(crate) fn take_coverage(&self) -> Option<serde_json::Value> {
        self.coverage.lock().unwrap().take()
    }
}

/// One isolated unit of execution hosting file runs sequentially.
pub struct ExecutionContext {
    worker_id: usize,
    config: Arc<ProjectConfig>,
    loader: Arc<dyn ModuleLoader>,
    snapshots: Arc<dyn SnapshotBackend>,
    handle: ContextHandle,
    init: OnceCell<Vec<SerializerRef>>,
}

impl ExecutionContext {
    pub fn new(
        worker_id: usize,
        config: Arc<ProjectConfig>,
        loader: Arc<dyn ModuleLoader>,
        snapshots: Arc<dyn SnapshotBackend>,
    ) -> Self {
        Self {
            worker_id,
            config,
            loader,
            snapshots,
            handle: ContextHandle::new(worker_id),
            init: OnceCell::new(),
        }
    }

    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    /// Run one file and produce its report.
    ///
    /// `started` fires before any real work begins so the dispatcher can
    /// distinguish execution start from queue wait.
    pub async fn run_file(
        &self,
        request: RunRequest,
        started: oneshot::Sender<()>,
    ) -> Result<TestFileReport, RunnerError> {
        let _ = started.send(());
        self.bootstrap().await?;

        debug!(
            worker = self.worker_id,
            file = %request.file.path.display(),
            "running test file"
        );

        let pattern = match &request.test_name_pattern {
            Some(raw) => Some(NamePattern::new(raw).map_err(|error| RunnerError::Pattern {
                pattern: raw.clone(),
                message: error.to_string(),
            })?),
            None => None,
        };

        let mut registry = DeclarationRegistry::new();
        match self.loader.load_default_export(&request.file.path)? {
            ModuleExport::Suite(factory) => factory(&mut registry),
            _ => {
                return Err(RunnerError::Load(LoadError::Failed {
                    path: request.file.path.clone(),
                    message: "module does not export a test suite".to_string(),
                }))
            }
        }
        let tree = registry.take_state();

        let snapshot_path = self.snapshots.resolve_path(&request.file.path);
        let serializers = self.handle.serializers.lock().unwrap().clone();
        let store: SnapshotHandle = Arc::new(Mutex::new(self.snapshots.open(
            &snapshot_path,
            request.update_snapshot,
            serializers,
        )));
        self.handle.expect.bind_snapshot(store.clone());

        let mut stats = RunStats::new();
        stats.begin();
        let outcomes = run_tree(&tree, self.handle.clone(), pattern, &mut stats).await;
        stats.finish();

        let snapshot = finalize_snapshot(&store, &outcomes, request.update_snapshot);

        self.handle.expect.unbind_snapshot();
        self.handle.expect.set_state(|state| {
            state.current_test_name = None;
            state.suppressed_errors.clear();
        });
        if let Some(pristine) = self.init.get() {
            *self.handle.serializers.lock().unwrap() = pristine.clone();
        }
        self.handle.cwd.reset();

        let coverage = if request.collect_coverage {
            self.handle.take_coverage()
        } else {
            None
        };

        Ok(to_report(&stats, outcomes, &request.file, snapshot, coverage))
    }

    /// Release per-context state when the pool retires this context.
    pub fn teardown(&self) {
        self.handle.cwd.reset();
        debug!(worker = self.worker_id, "execution context torn down");
    }
}
