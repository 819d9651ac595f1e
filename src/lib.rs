//! testpool - worker-pool test execution engine
//!
//! Runs batches of declared test files over a bounded pool of execution
//! contexts and produces one normalized report per file.
//!
//! ## Features
//!
//! - Nested suite/hook/test trees with focus, skip, and name-pattern
//!   filtering
//! - Deterministic hook ordering: beforeEach outermost-first, afterEach
//!   innermost-first, afterAll after all descendants
//! - Per-project context pools with bounded concurrency and an in-band
//!   single-context fallback for one worker
//! - Snapshot bookkeeping through a narrow store interface
//! - Per-test timing, error capture, and slow-file flagging
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use testpool::context::StaticModuleLoader;
//! use testpool::models::{ProjectConfig, RunnerConfig, TestFile};
//! use testpool::pool::{BatchDispatcher, RunCallbacks};
//! use testpool::snapshot::MemorySnapshotBackend;
//! use testpool::suite::TestBody;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), testpool::error::RunnerError> {
//!     let mut loader = StaticModuleLoader::new();
//!     loader.register_suite("math.test", |r| {
//!         r.describe("math", |r| {
//!             r.test(
//!                 "adds",
//!                 TestBody::returned(|_ctx| async {
//!                     assert_eq!(2 + 2, 4);
//!                     Ok(())
//!                 }),
//!             );
//!         });
//!     });
//!
//!     let dispatcher = BatchDispatcher::new(
//!         RunnerConfig::new(2),
//!         Arc::new(loader),
//!         Arc::new(MemorySnapshotBackend::new()),
//!     );
//!     let files = vec![TestFile::new("math.test", Arc::new(ProjectConfig::new("demo")))];
//!     dispatcher.run_batch(files, RunCallbacks::default()).await
//! }
//! ```

pub mod aggregate;
pub mod context;
pub mod error;
pub mod execution;
pub mod expect;
pub mod logging;
pub mod models;
pub mod pool;
pub mod snapshot;
pub mod suite;

pub use error::{LoadError, RunnerError, TestError};
pub use models::{
    ProjectConfig, RunnerConfig, TestFile, TestFileReport, TestStatus, UpdateSnapshotMode,
};
pub use pool::{BatchDispatcher, RunCallbacks};
