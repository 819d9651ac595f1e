//! Virtualized working directory
//!
//! Execution contexts without true process-directory support shadow the
//! current directory with an in-memory value resolved against the start
//! directory. Path and filesystem calls are unaffected.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct CwdShadow {
    start: PathBuf,
    current: Mutex<PathBuf>,
}

impl CwdShadow {
    pub fn new() -> Self {
        let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_start(start)
    }

    pub fn with_start(start: impl Into<PathBuf>) -> Self {
        let start = start.into();
        Self {
            current: Mutex::new(start.clone()),
            start,
        }
    }

    /// The shadowed current directory.
    pub fn cwd(&self) -> PathBuf {
        self.current.lock().unwrap().clone()
    }

    /// Change directory; relative paths resolve against the shadow.
    pub fn chdir(&self, dir: impl AsRef<Path>) {
        let mut current = self.current.lock().unwrap();
        *current = current.join(dir.as_ref());
    }

    pub fn start_dir(&self) -> &Path {
        &self.start
    }

    /// Restore the shadow to the true original directory.
    pub fn reset(&self) {
        *self.current.lock().unwrap() = self.start.clone();
    }
}

impl Default for CwdShadow {
    fn default() -> Self {
        Self::new()
    }
}
