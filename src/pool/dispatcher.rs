//! Batch dispatcher
//!
//! Maps an ordered batch of test files onto per-project context pools with
//! bounded concurrency, forwarding each file's start, report, or failure to
//! the caller's callbacks, and tearing every pool down once the batch
//! settles.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tracing::info;

use crate::context::{ModuleLoader, RunRequest};
use crate::error::RunnerError;
use crate::models::{RunnerConfig, TestFile, TestFileReport};
use crate::pool::context_pool::ContextPool;
use crate::pool::inband::InBandRunner;
use crate::snapshot::SnapshotBackend;

pub type OnStart = Arc<dyn Fn(TestFile) -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnResult = Arc<dyn Fn(TestFile, TestFileReport) + Send + Sync>;
pub type OnFailure = Arc<dyn Fn(TestFile, RunnerError) + Send + Sync>;

/// The caller's per-file callback triple.
#[derive(Clone)]
pub struct RunCallbacks {
    pub on_start: OnStart,
    pub on_result: OnResult,
    pub on_failure: OnFailure,
}

impl RunCallbacks {
    pub fn new<S, SF, R, F>(on_start: S, on_result: R, on_failure: F) -> Self
    where
        S: Fn(TestFile) -> SF + Send + Sync + 'static,
        SF: Future<Output = ()> + Send + 'static,
        R: Fn(TestFile, TestFileReport) + Send + Sync + 'static,
        F: Fn(TestFile, RunnerError) + Send + Sync + 'static,
    {
        Self {
            on_start: Arc::new(move |file| on_start(file).boxed()),
            on_result: Arc::new(on_result),
            on_failure: Arc::new(on_failure),
        }
    }
}

impl Default for RunCallbacks {
    fn default() -> Self {
        Self::new(|_| async {}, |_, _| {}, |_, _| {})
    }
}

/// Entry point for running a batch of test files.
pub struct BatchDispatcher {
    config: RunnerConfig,
    loader: Arc<dyn ModuleLoader>,
    snapshots: Arc<dyn SnapshotBackend>,
}

impl BatchDispatcher {
    pub fn new(
        config: RunnerConfig,
        loader: Arc<dyn ModuleLoader>,
        snapshots: Arc<dyn SnapshotBackend>,
    ) -> Self {
        Self {
            config,
            loader,
            snapshots,
        }
    }

    /// Run every file, bounded by the configured worker count, and destroy
    /// all pools afterwards. Per-file failures go through `on_failure`;
    /// only pool lifecycle failures abort the batch.
    pub async fn run_batch(
        &self,
        files: Vec<TestFile>,
        callbacks: RunCallbacks,
    ) -> Result<(), RunnerError> {
        info!(
            files = files.len(),
            workers = self.config.max_workers,
            "starting test batch"
        );

        if self.config.max_workers <= 1 {
            let mut runner = InBandRunner::new(self.loader.clone(), self.snapshots.clone());
            runner.run(files, &callbacks, &self.config).await?;
            info!("test batch complete");
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let pools: Arc<Mutex<HashMap<String, Arc<ContextPool>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let shutdown_grace = Duration::from_secs(self.config.shutdown_grace_secs);

        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            let semaphore = semaphore.clone();
            let pools = pools.clone();
            let callbacks = callbacks.clone();
            let loader = self.loader.clone();
            let snapshots = self.snapshots.clone();
            let collect_coverage = self.config.collect_coverage;
            let pool_size = self.config.max_workers;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();

                let pool = {
                    let mut pools = pools.lock().unwrap();
                    pools
                        .entry(file.config.name.clone())
                        .or_insert_with(|| {
                            Arc::new(ContextPool::new(
                                file.config.clone(),
                                pool_size,
                                loader,
                                snapshots,
                                shutdown_grace,
                            ))
                        })
                        .clone()
                };

                let request = RunRequest::for_file(file.clone(), collect_coverage);
                let (start_tx, start_rx) = oneshot::channel();
                let reply = match pool.submit(request, start_tx).await {
                    Ok(reply) => reply,
                    Err(error) => {
                        (callbacks.on_failure)(file, error);
                        return;
                    }
                };

                if start_rx.await.is_ok() {
                    (callbacks.on_start)(file.clone()).await;
                }

                match reply.await {
                    Ok(Ok(report)) => (callbacks.on_result)(file, report),
                    Ok(Err(error)) => (callbacks.on_failure)(file, error),
                    Err(_) => (callbacks.on_failure)(
                        file,
                        RunnerError::ContextCrash(
                            "execution context dropped its reply channel".to_string(),
                        ),
                    ),
                }
            }));
        }

        join_all(handles).await;

        let pools: Vec<Arc<ContextPool>> = pools
            .lock()
            .unwrap()
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.destroy().await?;
        }

        info!("test batch complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::context::StaticModuleLoader;
    use crate::models::{ProjectConfig, TestStatus};
    use crate::snapshot::MemorySnapshotBackend;
    use crate::suite::TestBody;

    type Events = Arc<Mutex<Vec<String>>>;
    type Reports = Arc<Mutex<Vec<(PathBuf, TestFileReport)>>>;
    type Failures = Arc<Mutex<Vec<(PathBuf, RunnerError)>>>;

    fn recording_callbacks(
        events: &Events,
        reports: &Reports,
        failures: &Failures,
    ) -> RunCallbacks {
        let (start_events, result_events) = (events.clone(), events.clone());
        let (reports, failures) = (reports.clone(), failures.clone());
        RunCallbacks::new(
            move |file: TestFile| {
                let events = start_events.clone();
                async move {
                    events
                        .lock()
                        .unwrap()
                        .push(format!("start:{}", file.path.display()));
                }
            },
            move |file, report| {
                result_events
                    .lock()
                    .unwrap()
                    .push(format!("result:{}", file.path.display()));
                reports.lock().unwrap().push((file.path, report));
            },
            move |file, error| {
                failures.lock().unwrap().push((file.path, error));
            },
        )
    }

    fn dispatcher(max_workers: usize, loader: StaticModuleLoader) -> BatchDispatcher {
        BatchDispatcher::new(
            RunnerConfig::new(max_workers).with_shutdown_grace_secs(1),
            Arc::new(loader),
            Arc::new(MemorySnapshotBackend::new()),
        )
    }

    #[tokio::test]
    async fn one_failing_one_passing_test_shape() {
        let mut loader = StaticModuleLoader::new();
        loader.register_suite("a.test", |r| {
            r.describe("A", |r| {
                r.test(
                    "x",
                    TestBody::returned(|_ctx| async { Err(crate::error::TestError::new("boom")) }),
                );
                r.test("y", TestBody::returned(|_ctx| async { Ok(()) }));
            });
        });

        let events = Events::default();
        let reports = Reports::default();
        let failures = Failures::default();
        let config = Arc::new(ProjectConfig::new("p"));

        dispatcher(2, loader)
            .run_batch(
                vec![TestFile::new("a.test", config)],
                recording_callbacks(&events, &reports, &failures),
            )
            .await
            .unwrap();

        assert!(failures.lock().unwrap().is_empty());
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);

        let report = &reports[0].1;
        assert_eq!(report.num_failing_tests, 1);
        assert_eq!(report.num_passing_tests, 1);
        assert_eq!(report.num_pending_tests, 0);
        assert_eq!(report.test_results.len(), 2);
        assert_eq!(report.test_results[0].status, TestStatus::Failed);
        assert_eq!(report.test_results[0].full_name, "A x");
        assert_eq!(report.test_results[1].status, TestStatus::Passed);
        assert_eq!(report.test_results[1].full_name, "A y");

        let events = events.lock().unwrap();
        assert_eq!(*events, vec!["start:a.test", "result:a.test"]);
    }

    #[tokio::test]
    async fn in_flight_files_never_exceed_the_worker_count() {
        let active = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        let mut loader = StaticModuleLoader::new();
        let mut files = Vec::new();
        let config = Arc::new(ProjectConfig::new("p"));
        for index in 0..10 {
            let path = format!("file-{index}.test");
            let active = active.clone();
            let observed_max = observed_max.clone();
            loader.register_suite(path.clone(), move |r| {
                let active = active.clone();
                let observed_max = observed_max.clone();
                r.test(
                    "holds a slot",
                    TestBody::returned(move |_ctx| {
                        let active = active.clone();
                        let observed_max = observed_max.clone();
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            observed_max.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                );
            });
            files.push(TestFile::new(path, config.clone()));
        }

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(2, loader)
            .run_batch(
                files,
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        assert!(failures.lock().unwrap().is_empty());
        assert_eq!(reports.lock().unwrap().len(), 10);
        assert!(observed_max.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn in_band_mode_preserves_strict_input_order() {
        let mut loader = StaticModuleLoader::new();
        let config = Arc::new(ProjectConfig::new("p"));
        let mut files = Vec::new();
        for name in ["one.test", "two.test", "three.test"] {
            loader.register_suite(name, |r| {
                r.test("works", TestBody::returned(|_ctx| async { Ok(()) }));
            });
            files.push(TestFile::new(name, config.clone()));
        }

        let events = Events::default();
        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(1, loader)
            .run_batch(files, recording_callbacks(&events, &reports, &failures))
            .await
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "start:one.test",
                "result:one.test",
                "start:two.test",
                "result:two.test",
                "start:three.test",
                "result:three.test",
            ]
        );
    }

    #[tokio::test]
    async fn load_failures_do_not_block_other_files() {
        let mut loader = StaticModuleLoader::new();
        loader.register_suite("good.test", |r| {
            r.test("works", TestBody::returned(|_ctx| async { Ok(()) }));
        });

        let config = Arc::new(ProjectConfig::new("p"));
        let files = vec![
            TestFile::new("missing.test", config.clone()),
            TestFile::new("good.test", config),
        ];

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(2, loader)
            .run_batch(
                files,
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, PathBuf::from("missing.test"));
        assert!(matches!(failures[0].1, RunnerError::Load(_)));

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, PathBuf::from("good.test"));
    }

    #[tokio::test]
    async fn a_crashing_load_surfaces_as_context_crash() {
        let mut loader = StaticModuleLoader::new();
        loader.register_suite("explodes.test", |_r| {
            panic!("loader blew up");
        });
        loader.register_suite("good.test", |r| {
            r.test("works", TestBody::returned(|_ctx| async { Ok(()) }));
        });

        let config = Arc::new(ProjectConfig::new("p"));
        let files = vec![
            TestFile::new("explodes.test", config.clone()),
            TestFile::new("good.test", config),
        ];

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(2, loader)
            .run_batch(
                files,
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        match &failures[0].1 {
            RunnerError::ContextCrash(message) => assert!(message.contains("loader blew up")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(reports.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn files_from_different_projects_use_separate_pools() {
        let mut loader = StaticModuleLoader::new();
        for name in ["api.test", "web.test"] {
            loader.register_suite(name, |r| {
                r.test("works", TestBody::returned(|_ctx| async { Ok(()) }));
            });
        }

        let files = vec![
            TestFile::new("api.test", Arc::new(ProjectConfig::new("api"))),
            TestFile::new("web.test", Arc::new(ProjectConfig::new("web"))),
        ];

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(2, loader)
            .run_batch(
                files,
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        assert!(failures.lock().unwrap().is_empty());
        assert_eq!(reports.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn snapshots_flow_through_the_bound_store() {
        use crate::context::ContextHandle;
        use crate::error::TestError;

        let mut loader = StaticModuleLoader::new();
        loader.register_suite("snap.test", |r| {
            r.describe("render", |r| {
                r.test(
                    "greets",
                    TestBody::returned(|ctx: ContextHandle| async move {
                        let name = ctx.expect.current_test_name().unwrap();
                        let store = ctx.expect.snapshot().unwrap();
                        let matched = store
                            .lock()
                            .unwrap()
                            .match_value(&name, &serde_json::json!("hello"));
                        if matched {
                            Ok(())
                        } else {
                            Err(TestError::new("snapshot mismatch"))
                        }
                    }),
                );
            });
        });

        let backend = MemorySnapshotBackend::new();
        let dispatcher = BatchDispatcher::new(
            RunnerConfig::new(2).with_shutdown_grace_secs(1),
            Arc::new(loader),
            Arc::new(backend.clone()),
        );

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher
            .run_batch(
                vec![TestFile::new("snap.test", Arc::new(ProjectConfig::new("p")))],
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        assert!(failures.lock().unwrap().is_empty());
        let reports = reports.lock().unwrap();
        assert_eq!(reports[0].1.num_passing_tests, 1);
        assert_eq!(reports[0].1.snapshot.added, 1);

        let entries = backend
            .entries(PathBuf::from("__snapshots__/snap.test.snap"))
            .unwrap();
        assert!(entries.contains_key("render greets 1"));
    }

    #[tokio::test]
    async fn coverage_payload_is_forwarded_when_requested() {
        use crate::context::ContextHandle;
        use crate::error::TestError;

        let mut loader = StaticModuleLoader::new();
        loader.register_suite("cov.test", |r| {
            r.test(
                "emits coverage",
                TestBody::returned(|ctx: ContextHandle| async move {
                    if ctx.worker_id() == 0 {
                        return Err(TestError::new("missing worker identity"));
                    }
                    ctx.set_coverage(serde_json::json!({"lines": 12}));
                    Ok(())
                }),
            );
        });

        let dispatcher = BatchDispatcher::new(
            RunnerConfig::new(2)
                .with_coverage(true)
                .with_shutdown_grace_secs(1),
            Arc::new(loader),
            Arc::new(MemorySnapshotBackend::new()),
        );

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher
            .run_batch(
                vec![TestFile::new("cov.test", Arc::new(ProjectConfig::new("p")))],
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        assert!(failures.lock().unwrap().is_empty());
        let reports = reports.lock().unwrap();
        assert_eq!(
            reports[0].1.coverage,
            Some(serde_json::json!({"lines": 12}))
        );
    }

    #[tokio::test]
    async fn per_file_serializer_registrations_do_not_leak() {
        use crate::context::ContextHandle;
        use crate::error::TestError;
        use crate::snapshot::SnapshotSerializer;
        use serde_json::Value;

        struct Loud;

        impl SnapshotSerializer for Loud {
            fn handles(&self, _value: &Value) -> bool {
                true
            }
            fn serialize(&self, value: &Value) -> String {
                format!("loud:{value}")
            }
        }

        let mut loader = StaticModuleLoader::new();
        loader.register_suite("adds.test", |r| {
            r.test(
                "registers",
                TestBody::returned(|ctx: ContextHandle| async move {
                    ctx.add_snapshot_serializer(Arc::new(Loud));
                    Ok(())
                }),
            );
        });
        loader.register_suite("checks.test", |r| {
            r.test(
                "sees pristine list",
                TestBody::returned(|ctx: ContextHandle| async move {
                    if ctx.serializers.lock().unwrap().is_empty() {
                        Ok(())
                    } else {
                        Err(TestError::new("serializer leaked into the next file"))
                    }
                }),
            );
        });

        let config = Arc::new(ProjectConfig::new("p"));
        let files = vec![
            TestFile::new("adds.test", config.clone()),
            TestFile::new("checks.test", config),
        ];

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(1, loader)
            .run_batch(
                files,
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        assert!(failures.lock().unwrap().is_empty());
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|(_, r)| r.num_failing_tests == 0));
    }

    #[tokio::test]
    async fn an_invalid_name_pattern_fails_only_that_file() {
        let mut loader = StaticModuleLoader::new();
        loader.register_suite("patterned.test", |r| {
            r.test("works", TestBody::returned(|_ctx| async { Ok(()) }));
        });

        let config = Arc::new(ProjectConfig::new("p").with_test_name_pattern("(unclosed"));
        let files = vec![TestFile::new("patterned.test", config)];

        let reports = Reports::default();
        let failures = Failures::default();
        dispatcher(2, loader)
            .run_batch(
                files,
                recording_callbacks(&Events::default(), &reports, &failures),
            )
            .await
            .unwrap();

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, RunnerError::Pattern { .. }));
        assert!(reports.lock().unwrap().is_empty());
    }
}
