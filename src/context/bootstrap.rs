//! One-time context initialization
//!
//! Loads project setup files, registers snapshot serializers, and caches
//! the pristine serializer list. Guarded so concurrent first callers block
//! on the same initialization and replay its result.

use std::path::Path;

use tracing::debug;

use crate::context::loader::ModuleExport;
use crate::context::ExecutionContext;
use crate::error::RunnerError;
use crate::snapshot::SerializerRef;

impl ExecutionContext {
    /// Run the once-only bootstrap, or replay its cached result.
    pub(crate) async fn bootstrap(&self) -> Result<(), RunnerError> {
        self.init.get_or_try_init(|| self.bootstrap_once()).await?;
        Ok(())
    }

    async fn bootstrap_once(&self) -> Result<Vec<SerializerRef>, RunnerError> {
        debug!(
            worker = self.worker_id,
            project = %self.config.name,
            "bootstrapping execution context"
        );

        for path in &self.config.setup_files {
            self.run_setup_file(path).await?;
        }
        for path in &self.config.setup_files_after_env {
            self.run_setup_file(path).await?;
        }

        // Reverse declaration order plus front-first lookup gives the
        // last-declared serializer the highest match priority.
        let mut serializers = Vec::new();
        for path in self.config.snapshot_serializers.iter().rev() {
            match self.loader.load_default_export(path)? {
                ModuleExport::Serializer(serializer) => serializers.push(serializer),
                _ => {
                    return Err(RunnerError::Setup {
                        path: path.clone(),
                        message: "module does not export a snapshot serializer".to_string(),
                    })
                }
            }
        }
        *self.handle.serializers.lock().unwrap() = serializers.clone();

        Ok(serializers)
    }

    async fn run_setup_file(&self, path: &Path) -> Result<(), RunnerError> {
        match self.loader.load_default_export(path)? {
            ModuleExport::Setup(setup) => {
                setup(self.handle.clone())
                    .await
                    .map_err(|error| RunnerError::Setup {
                        path: path.to_path_buf(),
                        message: error.to_string(),
                    })
            }
            // Exports that are not functions are skipped silently.
            _ => Ok(()),
        }
    }
}
