//! Process environment guard
//!
//! Saves process-wide state around an in-band context's use and restores
//! it on drop, so one file's environment mutations cannot leak. The
//! process environment is a single shared resource, so guards serialize
//! behind one lock.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// Worker identity published to the file under test.
pub const WORKER_ID_ENV: &str = "TESTPOOL_WORKER_ID";

static ENV_LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();

pub struct EnvGuard {
    original_dir: PathBuf,
    previous_worker_id: Option<OsString>,
    _lock: OwnedMutexGuard<()>,
}

impl EnvGuard {
    /// Capture the current directory and worker id variable, then publish
    /// `worker_id`. Blocks until no other guard is live.
    pub async fn enter(worker_id: usize) -> io::Result<Self> {
        let lock = ENV_LOCK
            .get_or_init(|| Arc::new(Mutex::new(())))
            .clone()
            .lock_owned()
            .await;

        let original_dir = env::current_dir()?;
        let previous_worker_id = env::var_os(WORKER_ID_ENV);
        env::set_var(WORKER_ID_ENV, worker_id.to_string());
        Ok(Self {
            original_dir,
            previous_worker_id,
            _lock: lock,
        })
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Err(error) = env::set_current_dir(&self.original_dir) {
            warn!("failed to restore working directory: {error}");
        }
        match &self.previous_worker_id {
            Some(value) => env::set_var(WORKER_ID_ENV, value),
            None => env::remove_var(WORKER_ID_ENV),
        }
    }
}
