//! Test declaration registry
//!
//! The context-scoped object test modules populate while loading. One
//! registry exists per file load; it is reset between loads and handed to
//! the module explicitly, never through an ambient global.

use std::future::Future;
use std::mem;

use crate::context::ContextHandle;
use crate::error::TestError;
use crate::suite::node::{Hook, HookKind, SuiteArena, SuiteId, TestBody, TestMode, TestNode};

/// The fully declared tree of one loaded file.
pub struct LoadedTree {
    pub arena: SuiteArena,
    pub root: SuiteId,
    pub has_focused_tests: bool,
}

/// Collects suite, test, and hook declarations into an arena.
pub struct DeclarationRegistry {
    arena: SuiteArena,
    stack: Vec<SuiteId>,
    has_focused_tests: bool,
}

impl DeclarationRegistry {
    pub fn new() -> Self {
        let arena = SuiteArena::new();
        let root = arena.root();
        Self {
            arena,
            stack: vec![root],
            has_focused_tests: false,
        }
    }

    fn current(&self) -> SuiteId {
        self.stack.last().copied().unwrap_or_else(|| self.arena.root())
    }

    fn enter_suite(&mut self, name: impl Into<String>, mode: TestMode, f: impl FnOnce(&mut Self)) {
        let id = self.arena.add_suite(self.current(), name, mode);
        self.stack.push(id);
        f(self);
        self.stack.pop();
    }

    /// Declare a nested suite.
    pub fn describe(&mut self, name: impl Into<String>, f: impl FnOnce(&mut Self)) {
        self.enter_suite(name, TestMode::Normal, f);
    }

    /// Declare a suite whose entire subtree is reported pending.
    pub fn describe_skip(&mut self, name: impl Into<String>, f: impl FnOnce(&mut Self)) {
        self.enter_suite(name, TestMode::Skip, f);
    }

    fn add_test(&mut self, name: impl Into<String>, mode: TestMode, body: TestBody) {
        self.arena.add_test(
            self.current(),
            TestNode {
                name: name.into(),
                mode,
                body,
            },
        );
    }

    pub fn test(&mut self, name: impl Into<String>, body: TestBody) {
        self.add_test(name, TestMode::Normal, body);
    }

    /// Declare a focused test; every non-focused test in the file becomes
    /// pending.
    pub fn test_only(&mut self, name: impl Into<String>, body: TestBody) {
        self.has_focused_tests = true;
        self.add_test(name, TestMode::Only, body);
    }

    pub fn test_skip(&mut self, name: impl Into<String>, body: TestBody) {
        self.add_test(name, TestMode::Skip, body);
    }

    fn add_hook<F, Fut>(&mut self, kind: HookKind, f: F)
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        let current = self.current();
        self.arena.add_hook(current, Hook::new(kind, f));
    }

    pub fn before_all<F, Fut>(&mut self, f: F)
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.add_hook(HookKind::BeforeAll, f);
    }

    pub fn before_each<F, Fut>(&mut self, f: F)
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.add_hook(HookKind::BeforeEach, f);
    }

    pub fn after_all<F, Fut>(&mut self, f: F)
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.add_hook(HookKind::AfterAll, f);
    }

    pub fn after_each<F, Fut>(&mut self, f: F)
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        self.add_hook(HookKind::AfterEach, f);
    }

    /// Discard all declarations and start a fresh tree.
    pub fn reset_state(&mut self) {
        *self = Self::new();
    }

    /// Take the declared tree, leaving the registry reset.
    pub fn take_state(&mut self) -> LoadedTree {
        let arena = mem::take(&mut self.arena);
        let has_focused_tests = mem::take(&mut self.has_focused_tests);
        let root = arena.root();
        self.stack = vec![self.arena.root()];
        LoadedTree {
            arena,
            root,
            has_focused_tests,
        }
    }
}

impl Default for DeclarationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
