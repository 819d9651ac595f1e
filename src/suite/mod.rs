//! Suite tree model and declaration registry
//!
//! The loaded shape of a test file before execution.

mod node;
mod registry;

pub use node::{
    BodyFn, Child, Done, Hook, HookKind, SuiteArena, SuiteId, SuiteNode, TestBody, TestMode,
    TestNode,
};
pub use registry::{DeclarationRegistry, LoadedTree};
