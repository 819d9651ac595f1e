//! In-band execution
//!
//! The strictly ordered single-context fallback selected when one worker
//! is requested. No isolation context is spawned; the caller explicitly
//! asked to share process state with the files under test, so the
//! environment guard protects the surrounding process instead.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::context::{EnvGuard, ExecutionContext, ModuleLoader, RunRequest};
use crate::error::RunnerError;
use crate::models::{RunnerConfig, TestFile};
use crate::pool::RunCallbacks;
use crate::snapshot::SnapshotBackend;

pub struct InBandRunner {
    loader: Arc<dyn ModuleLoader>,
    snapshots: Arc<dyn SnapshotBackend>,
    contexts: HashMap<String, ExecutionContext>,
}

impl InBandRunner {
    pub fn new(loader: Arc<dyn ModuleLoader>, snapshots: Arc<dyn SnapshotBackend>) -> Self {
        Self {
            loader,
            snapshots,
            contexts: HashMap::new(),
        }
    }

    /// Process files one at a time, in input order.
    pub async fn run(
        &mut self,
        files: Vec<TestFile>,
        callbacks: &RunCallbacks,
        config: &RunnerConfig,
    ) -> Result<(), RunnerError> {
        let _guard = EnvGuard::enter(1).await.map_err(|error| {
            RunnerError::Pool(format!("failed to capture process environment: {error}"))
        })?;

        debug!(files = files.len(), "running batch in band");

        for file in files {
            (callbacks.on_start)(file.clone()).await;

            let loader = self.loader.clone();
            let snapshots = self.snapshots.clone();
            let project_config = file.config.clone();
            let context = self
                .contexts
                .entry(file.config.name.clone())
                .or_insert_with(|| ExecutionContext::new(1, project_config, loader, snapshots));

            let request = RunRequest::for_file(file.clone(), config.collect_coverage);
            let (started, _discard) = oneshot::channel();
            match context.run_file(request, started).await {
                Ok(report) => (callbacks.on_result)(file, report),
                Err(error) => (callbacks.on_failure)(file, error),
            }
        }

        for context in self.contexts.values() {
            context.teardown();
        }
        Ok(())
    }
}
