//! Worker pool dispatch
//!
//! Routes test files to bounded pools of execution contexts, or to the
//! in-band single-context executor when one worker is requested.

mod context_pool;
mod dispatcher;
mod inband;

pub use context_pool::ContextPool;
pub use dispatcher::{BatchDispatcher, OnFailure, OnResult, OnStart, RunCallbacks};
pub use inband::InBandRunner;
