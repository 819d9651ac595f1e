//! Test-tree interpreter
//!
//! Walks a loaded suite tree depth-first, applying focus, skip, and
//! name-pattern decisions, running hooks in nesting order, and recording
//! one outcome per executed test or failed hook. Errors raised here are
//! always converted to outcomes; nothing unwinds past this boundary.

mod filter;
mod outcome;

pub use filter::{full_name, NamePattern};
pub use outcome::{RunStats, TestOutcome};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::context::ContextHandle;
use crate::error::TestError;
use crate::suite::{BodyFn, Child, Done, HookKind, LoadedTree, SuiteArena, SuiteId, TestBody, TestMode};

/// Execute a loaded tree, mutating `stats` and returning the outcomes in
/// execution order.
pub async fn run_tree(
    tree: &LoadedTree,
    ctx: ContextHandle,
    pattern: Option<NamePattern>,
    stats: &mut RunStats,
) -> Vec<TestOutcome> {
    let mut run = TreeRun {
        ctx,
        pattern,
        has_focused: tree.has_focused_tests,
        stats,
        results: Vec::new(),
    };
    run.run_suite(&tree.arena, tree.root, Vec::new()).await;
    run.results
}

enum Planned {
    Skipped(String),
    Suite(SuiteId, String),
    Test(String, TestBody),
}

struct TreeRun<'a> {
    ctx: ContextHandle,
    pattern: Option<NamePattern>,
    has_focused: bool,
    stats: &'a mut RunStats,
    results: Vec<TestOutcome>,
}

impl TreeRun<'_> {
    fn run_suite<'s>(
        &'s mut self,
        arena: &'s SuiteArena,
        id: SuiteId,
        ancestors: Vec<String>,
    ) -> BoxFuture<'s, ()> {
        async move {
            self.run_own_hooks(arena, id, HookKind::BeforeAll, &ancestors).await;

            let child_count = arena.node(id).children.len();
            for index in 0..child_count {
                let planned = {
                    match &arena.node(id).children[index] {
                        Child::Suite(child_id) => {
                            let child = arena.node(*child_id);
                            if child.mode == TestMode::Skip {
                                Planned::Skipped(child.name.clone())
                            } else {
                                Planned::Suite(*child_id, child.name.clone())
                            }
                        }
                        Child::Test(test) => {
                            if self.should_skip_test(&ancestors, &test.name, test.mode) {
                                Planned::Skipped(test.name.clone())
                            } else {
                                Planned::Test(test.name.clone(), test.body.clone())
                            }
                        }
                    }
                };

                match planned {
                    Planned::Skipped(title) => {
                        self.stats.pending += 1;
                        self.results.push(TestOutcome::skipped(ancestors.clone(), title));
                    }
                    Planned::Suite(child_id, name) => {
                        let mut next = ancestors.clone();
                        next.push(name);
                        self.run_suite(arena, child_id, next).await;
                    }
                    Planned::Test(name, body) => {
                        let mut next = ancestors.clone();
                        next.push(name.clone());
                        self.run_each_hooks(arena, id, HookKind::BeforeEach, &next).await;
                        self.run_test(&body, &ancestors, &name).await;
                        self.run_each_hooks(arena, id, HookKind::AfterEach, &next).await;
                    }
                }
            }

            self.run_own_hooks(arena, id, HookKind::AfterAll, &ancestors).await;
        }
        .boxed()
    }

    fn should_skip_test(&self, ancestors: &[String], name: &str, mode: TestMode) -> bool {
        if mode == TestMode::Skip {
            return true;
        }
        if self.has_focused && mode != TestMode::Only {
            return true;
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.matches(&full_name(ancestors, name)) {
                return true;
            }
        }
        false
    }

    /// Hooks declared directly on `id`; failures record an outcome and do
    /// not abort remaining hooks or the subtree.
    async fn run_own_hooks(
        &mut self,
        arena: &SuiteArena,
        id: SuiteId,
        kind: HookKind,
        ancestors: &[String],
    ) {
        for hook in arena.node(id).hooks.iter().filter(|h| h.kind == kind) {
            self.run_hook(&hook.body, kind, ancestors).await;
        }
    }

    /// Each-hooks along the ancestor chain: beforeEach outermost-first,
    /// afterEach innermost-first.
    async fn run_each_hooks(
        &mut self,
        arena: &SuiteArena,
        parent: SuiteId,
        kind: HookKind,
        ancestors: &[String],
    ) {
        let mut chain = arena.chain_to_root(parent);
        if kind == HookKind::BeforeEach {
            chain.reverse();
        }
        for suite_id in chain {
            for hook in arena.node(suite_id).hooks.iter().filter(|h| h.kind == kind) {
                self.run_hook(&hook.body, kind, ancestors).await;
            }
        }
    }

    async fn run_hook(&mut self, body: &BodyFn, kind: HookKind, ancestors: &[String]) {
        if let Err(error) = invoke_hook(body, self.ctx.clone()).await {
            self.stats.failures += 1;
            self.results
                .push(TestOutcome::hook_failure(ancestors.to_vec(), kind, error));
        }
    }

    async fn run_test(&mut self, body: &TestBody, ancestors: &[String], name: &str) {
        self.ctx.expect.set_state(|state| {
            state.suppressed_errors.clear();
            state.current_test_name = Some(full_name(ancestors, name));
        });

        let started = Instant::now();
        let mut errors = Vec::new();
        if let Err(error) = invoke_body(body, self.ctx.clone()).await {
            errors.push(error);
        }
        let duration = started.elapsed();

        // Suppressed assertion errors come first and can fail an otherwise
        // passing test.
        let mut suppressed = self.ctx.expect.take_suppressed_errors();
        if !suppressed.is_empty() {
            suppressed.extend(errors);
            errors = suppressed;
        }

        if errors.is_empty() {
            self.stats.passes += 1;
        } else {
            self.stats.failures += 1;
        }
        self.results.push(TestOutcome {
            ancestors: ancestors.to_vec(),
            title: name.to_string(),
            duration: Some(duration),
            errors,
            skipped: false,
        });
    }
}

async fn invoke_hook(body: &BodyFn, ctx: ContextHandle) -> Result<(), TestError> {
    match AssertUnwindSafe(body(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TestError::from_panic(payload)),
    }
}

/// Normalize both calling conventions into resolved or rejected.
async fn invoke_body(body: &TestBody, ctx: ContextHandle) -> Result<(), TestError> {
    match body {
        TestBody::Returned(f) => match AssertUnwindSafe(f(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(TestError::from_panic(payload)),
        },
        TestBody::Callback(f) => {
            let (done, rx) = Done::channel();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(ctx, done))) {
                return Err(TestError::from_panic(payload));
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(TestError::new(
                    "completion callback dropped without settling the test",
                )),
            }
        }
    }
}
