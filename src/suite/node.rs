//! Suite tree storage
//!
//! Arena-backed tree of suites, tests, and hooks. Parent references are
//! plain indices into the arena, never owning pointers.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::context::ContextHandle;
use crate::error::TestError;

/// Index of a suite node inside its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SuiteId(usize);

/// Declaration mode of a suite or test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TestMode {
    #[default]
    Normal,
    Only,
    Skip,
}

/// Lifecycle position of a hook within its suite's scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    BeforeAll,
    BeforeEach,
    AfterAll,
    AfterEach,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::BeforeAll => write!(f, "beforeAll"),
            HookKind::BeforeEach => write!(f, "beforeEach"),
            HookKind::AfterAll => write!(f, "afterAll"),
            HookKind::AfterEach => write!(f, "afterEach"),
        }
    }
}

/// A future-returning body shared by hooks and returned-style tests.
pub type BodyFn =
    Arc<dyn Fn(ContextHandle) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

/// One-shot completion handle handed to callback-style test bodies.
///
/// Dropping the handle without calling `ok` or `err` fails the test, the
/// same as a completion callback that is never invoked.
pub struct Done {
    tx: Option<oneshot::Sender<Result<(), TestError>>>,
}

impl Done {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<(), TestError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn ok(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(()));
        }
    }

    pub fn err(mut self, error: impl Into<TestError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error.into()));
        }
    }
}

/// Executable body of a test, in one of the two calling conventions.
#[derive(Clone)]
pub enum TestBody {
    /// Settles the test when the returned future resolves.
    Returned(BodyFn),
    /// Settles the test through the `Done` handle.
    Callback(Arc<dyn Fn(ContextHandle, Done) + Send + Sync>),
}

impl TestBody {
    pub fn returned<F, Fut>(f: F) -> Self
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        TestBody::Returned(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(ContextHandle, Done) + Send + Sync + 'static,
    {
        TestBody::Callback(Arc::new(f))
    }
}

/// A hook declared on a suite.
#[derive(Clone)]
pub struct Hook {
    pub kind: HookKind,
    pub body: BodyFn,
}

impl Hook {
    pub fn new<F, Fut>(kind: HookKind, f: F) -> Self
    where
        F: Fn(ContextHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        Self {
            kind,
            body: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }
}

/// A leaf test owned by its parent suite.
#[derive(Clone)]
pub struct TestNode {
    pub name: String,
    pub mode: TestMode,
    pub body: TestBody,
}

/// Ordered child of a suite.
#[derive(Clone)]
pub enum Child {
    Suite(SuiteId),
    Test(TestNode),
}

/// A named group of tests, nested suites, and hooks.
pub struct SuiteNode {
    pub name: String,
    pub mode: TestMode,
    pub parent: Option<SuiteId>,
    pub children: Vec<Child>,
    pub hooks: Vec<Hook>,
}

/// Arena holding every suite of one loaded file.
///
/// The root suite lives at index 0, is unnamed, and has no parent.
pub struct SuiteArena {
    nodes: Vec<SuiteNode>,
}

impl SuiteArena {
    pub fn new() -> Self {
        Self {
            nodes: vec![SuiteNode {
                name: String::new(),
                mode: TestMode::Normal,
                parent: None,
                children: Vec::new(),
                hooks: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> SuiteId {
        SuiteId(0)
    }

    pub fn node(&self, id: SuiteId) -> &SuiteNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: SuiteId) -> &mut SuiteNode {
        &mut self.nodes[id.0]
    }

    pub fn add_suite(&mut self, parent: SuiteId, name: impl Into<String>, mode: TestMode) -> SuiteId {
        let id = SuiteId(self.nodes.len());
        self.nodes.push(SuiteNode {
            name: name.into(),
            mode,
            parent: Some(parent),
            children: Vec::new(),
            hooks: Vec::new(),
        });
        self.node_mut(parent).children.push(Child::Suite(id));
        id
    }

    pub fn add_test(&mut self, parent: SuiteId, test: TestNode) {
        self.node_mut(parent).children.push(Child::Test(test));
    }

    pub fn add_hook(&mut self, parent: SuiteId, hook: Hook) {
        self.node_mut(parent).hooks.push(hook);
    }

    /// Suite ids from `id` up to and including the root.
    pub fn chain_to_root(&self, id: SuiteId) -> Vec<SuiteId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Number of leaf tests in the whole tree.
    pub fn test_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.children.iter())
            .filter(|c| matches!(c, Child::Test(_)))
            .count()
    }
}

impl Default for SuiteArena {
    fn default() -> Self {
        Self::new()
    }
}
