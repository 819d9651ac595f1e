//! Module loader abstraction
//!
//! Loads setup files, serializers, and test suites by path. The engine
//! never touches a platform loading facility directly; it goes through
//! this interface so hosts can swap in their own resolution.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::ContextHandle;
use crate::error::{LoadError, TestError};
use crate::snapshot::SerializerRef;
use crate::suite::DeclarationRegistry;

/// An awaited per-context setup function.
pub type SetupFn =
    Arc<dyn Fn(ContextHandle) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

/// Populates a registry with a file's suite declarations.
pub type SuiteFactory = Arc<dyn Fn(&mut DeclarationRegistry) + Send + Sync>;

/// The default export of a loaded module.
#[derive(Clone)]
pub enum ModuleExport {
    Setup(SetupFn),
    Serializer(SerializerRef),
    Suite(SuiteFactory),
    /// A plain value export; setup loading skips these silently.
    Value(serde_json::Value),
}

impl std::fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleExport::Setup(_) => f.write_str("Setup(..)"),
            ModuleExport::Serializer(_) => f.write_str("Serializer(..)"),
            ModuleExport::Suite(_) => f.write_str("Suite(..)"),
            ModuleExport::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// Resolves a path to its module's default export.
pub trait ModuleLoader: Send + Sync {
    fn load_default_export(&self, path: &Path) -> Result<ModuleExport, LoadError>;
}

type ExportFactory = Box<dyn Fn() -> ModuleExport + Send + Sync>;

/// In-memory loader mapping registered paths to export factories.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: HashMap<PathBuf, ExportFactory>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: impl Into<PathBuf>,
        factory: impl Fn() -> ModuleExport + Send + Sync + 'static,
    ) {
        self.modules.insert(path.into(), Box::new(factory));
    }

    /// Register a test file that declares suites into the given registry.
    pub fn register_suite(
        &mut self,
        path: impl Into<PathBuf>,
        f: impl Fn(&mut DeclarationRegistry) + Send + Sync + 'static,
    ) {
        let factory: SuiteFactory = Arc::new(f);
        self.register(path, move || ModuleExport::Suite(factory.clone()));
    }

    /// Register a setup module whose export is an awaited function.
    pub fn register_setup<F, Fut>(&mut self, path: impl Into<PathBuf>, f: F)
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        let setup: SetupFn = Arc::new(move |ctx| f(ctx).boxed());
        self.register(path, move || ModuleExport::Setup(setup.clone()));
    }

    pub fn register_serializer(&mut self, path: impl Into<PathBuf>, serializer: SerializerRef) {
        self.register(path, move || ModuleExport::Serializer(serializer.clone()));
    }

    /// Register a module exporting a plain value.
    pub fn register_value(&mut self, path: impl Into<PathBuf>, value: serde_json::Value) {
        self.register(path, move || ModuleExport::Value(value.clone()));
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load_default_export(&self, path: &Path) -> Result<ModuleExport, LoadError> {
        self.modules
            .get(path)
            .map(|factory| factory())
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_path_is_a_load_error() {
        let loader = StaticModuleLoader::new();
        let err = loader
            .load_default_export(Path::new("ghost.test"))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn registered_suite_is_returned() {
        let mut loader = StaticModuleLoader::new();
        loader.register_suite("a.test", |r| {
            r.test("works", crate::suite::TestBody::returned(|_ctx| async { Ok(()) }));
        });

        let export = loader.load_default_export(Path::new("a.test")).unwrap();
        let mut registry = DeclarationRegistry::new();
        match export {
            ModuleExport::Suite(factory) => factory(&mut registry),
            _ => panic!("expected a suite export"),
        }
        assert_eq!(registry.take_state().arena.test_count(), 1);
    }

    #[test]
    fn value_exports_round_trip() {
        let mut loader = StaticModuleLoader::new();
        loader.register_value("data", serde_json::json!({"k": 1}));
        match loader.load_default_export(Path::new("data")).unwrap() {
            ModuleExport::Value(v) => assert_eq!(v["k"], 1),
            _ => panic!("expected a value export"),
        }
    }
}
