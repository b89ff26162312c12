// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    dispatcher::{CancelEvent, DispatcherContext, HandleEventResponse},
    executor::{ExecutorContext, TestExecutor, check_join_result},
    internal_events::InternalEvent,
};
use crate::{
    config::{EmutestProfile, MaxConcurrency, TimeCap},
    discovery::TestFile,
    errors::{TestRunnerBuildError, TestRunnerExecuteError},
    process::Cancelled,
    reporter::events::{CancelReason, TestEvent},
    signal::{SignalHandler, SignalHandlerKind},
    test_case::{ContinuationPolicy, TestCase, TestId, TestState, TestUnit},
    time::stopwatch,
};
use std::{num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::{runtime::Runtime, sync::mpsc::unbounded_channel};
use tracing::debug;

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    max_concurrency: Option<MaxConcurrency>,
    iterations: Option<NonZeroUsize>,
    run_timeout: Option<Duration>,
    time_cap: Option<TimeCap>,
    early_exit: Option<bool>,
}

impl TestRunnerBuilder {
    /// Sets the number of tests that may build or run at once.
    pub fn set_max_concurrency(&mut self, max_concurrency: MaxConcurrency) -> &mut Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Sets the number of iterations per test.
    pub fn set_iterations(&mut self, iterations: NonZeroUsize) -> &mut Self {
        self.iterations = Some(iterations);
        self
    }

    /// Sets the deadline for a single sandbox run.
    pub fn set_run_timeout(&mut self, run_timeout: Duration) -> &mut Self {
        self.run_timeout = Some(run_timeout);
        self
    }

    /// Sets the cumulative time budget per test.
    pub fn set_time_cap(&mut self, time_cap: TimeCap) -> &mut Self {
        self.time_cap = Some(time_cap);
        self
    }

    /// Sets whether a test stops iterating after its first failed iteration.
    pub fn set_early_exit(&mut self, early_exit: bool) -> &mut Self {
        self.early_exit = Some(early_exit);
        self
    }

    /// Resolves these options against `profile`, without building a runtime.
    pub fn settings(&self, profile: &EmutestProfile<'_>) -> RunSettings {
        RunSettings {
            max_concurrency: self
                .max_concurrency
                .unwrap_or_else(|| profile.max_concurrency())
                .compute(),
            policy: ContinuationPolicy {
                iterations: self.iterations.unwrap_or_else(|| profile.iterations()),
                early_exit: self.early_exit.unwrap_or_else(|| profile.early_exit()),
                time_cap: self.time_cap.unwrap_or_else(|| profile.time_cap()),
            },
            run_timeout: self.run_timeout.unwrap_or_else(|| profile.run_timeout()),
        }
    }

    /// Creates a new test runner.
    pub fn build<E: TestExecutor>(
        self,
        tests: Vec<TestFile>,
        profile: &EmutestProfile<'_>,
        signal_handler: SignalHandlerKind,
        executor: E,
    ) -> Result<TestRunner<E>, TestRunnerBuildError> {
        let settings = self.settings(profile);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("emutest-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;
        let _guard = runtime.enter();

        // signal_handler.build() must be called from within the guard.
        let signal_handler = signal_handler.build()?;

        Ok(TestRunner {
            inner: TestRunnerInner {
                tests,
                settings,
                executor: Arc::new(executor),
            },
            runtime,
            signal_handler,
        })
    }
}

/// Concrete limits for a run, after CLI overrides and profile defaults are applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunSettings {
    /// The maximum number of tests building or running at once. Always at least 1.
    pub max_concurrency: usize,

    /// When each test stops iterating.
    pub policy: ContinuationPolicy,

    /// The deadline for a single sandbox run.
    pub run_timeout: Duration,
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner<E> {
    inner: TestRunnerInner<E>,
    runtime: Runtime,
    signal_handler: SignalHandler,
}

impl<E: TestExecutor> TestRunner<E> {
    /// Returns the settings this runner was built with.
    pub fn settings(&self) -> RunSettings {
        self.inner.settings
    }

    /// Builds shared dependencies, then builds and runs every test.
    ///
    /// The callback is called with each event of the run, in order.
    ///
    /// Returns an error if the shared dependencies failed to build. Panics in executor tasks are
    /// propagated.
    pub fn execute<F>(mut self, callback: F) -> Result<RunStats, TestRunnerExecuteError>
    where
        F: FnMut(TestEvent) + Send,
    {
        let res = self
            .runtime
            .block_on(self.inner.execute(&mut self.signal_handler, callback));

        // Anything still running has been signalled to stop, don't wait for stragglers.
        self.runtime.shutdown_background();
        res
    }
}

#[derive(Debug)]
struct TestRunnerInner<E> {
    tests: Vec<TestFile>,
    settings: RunSettings,
    executor: Arc<E>,
}

impl<E: TestExecutor> TestRunnerInner<E> {
    async fn execute<F>(
        &self,
        signal_handler: &mut SignalHandler,
        callback: F,
    ) -> Result<RunStats, TestRunnerExecuteError>
    where
        F: FnMut(TestEvent) + Send,
    {
        let tests = self
            .tests
            .iter()
            .enumerate()
            .map(|(index, file)| {
                TestCase::new(
                    TestUnit::new(TestId::new(index), file.clone()),
                    self.settings.policy.iterations,
                )
            })
            .collect();

        let (event_tx, mut event_rx) = unbounded_channel();
        let mut executor_cx = ExecutorContext::new(self.executor.clone(), event_tx);
        let mut dispatcher_cx = DispatcherContext::new(callback, tests, self.settings);

        dispatcher_cx.run_started();

        let mut signals_done = false;
        let mut cancelled = false;

        let deps_stopwatch = stopwatch();
        let deps_result = {
            let deps_fut = executor_cx.build_dependencies();
            tokio::pin!(deps_fut);
            loop {
                tokio::select! {
                    res = &mut deps_fut => break res,
                    recv = signal_handler.recv(), if !signals_done => {
                        let Some(event) = recv else {
                            signals_done = true;
                            continue;
                        };
                        match dispatcher_cx.handle_event(InternalEvent::Signal(event)) {
                            HandleEventResponse::Cancel(CancelEvent::Graceful) => {
                                cancelled = true;
                                executor_cx.cancel();
                            }
                            HandleEventResponse::Cancel(CancelEvent::Kill) => {
                                break Err(Cancelled);
                            }
                            HandleEventResponse::Launch(_) | HandleEventResponse::None => {}
                        }
                    }
                }
            }
        };

        match deps_result {
            Ok(Ok(())) if !cancelled => {
                dispatcher_cx.dependencies_built(deps_stopwatch.snapshot().duration);
            }
            Ok(Err(error)) if !cancelled => return Err(error.into()),
            _ => {
                debug!("run cancelled while building dependencies");
                dispatcher_cx.run_finished();
                return Ok(dispatcher_cx.run_stats());
            }
        }

        loop {
            let event = if let Some(control) = dispatcher_cx.next_control_event() {
                InternalEvent::Control(control)
            } else if !executor_cx.has_tasks() && (cancelled || dispatcher_cx.all_resolved()) {
                // Events from tasks that finished before the last join still need handling.
                match event_rx.try_recv() {
                    Ok(event) => InternalEvent::Executor(event),
                    Err(_) => break,
                }
            } else {
                tokio::select! {
                    Some(event) = event_rx.recv() => InternalEvent::Executor(event),
                    Some(res) = executor_cx.join_next(), if executor_cx.has_tasks() => {
                        check_join_result(res);
                        continue;
                    }
                    recv = signal_handler.recv(), if !signals_done => {
                        match recv {
                            Some(event) => InternalEvent::Signal(event),
                            None => {
                                signals_done = true;
                                continue;
                            }
                        }
                    }
                }
            };

            match dispatcher_cx.handle_event(event) {
                HandleEventResponse::Launch(ops) => {
                    for op in ops {
                        let unit = dispatcher_cx.unit(op.id()).clone();
                        executor_cx.launch(op, unit);
                    }
                }
                HandleEventResponse::Cancel(CancelEvent::Graceful) => {
                    cancelled = true;
                    executor_cx.cancel();
                }
                HandleEventResponse::Cancel(CancelEvent::Kill) => {
                    cancelled = true;
                    executor_cx.cancel();
                    executor_cx.abort_all();
                }
                HandleEventResponse::None => {}
            }
        }

        dispatcher_cx.run_finished();
        Ok(dispatcher_cx.run_stats())
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of tests that were expected to be run at the beginning.
    ///
    /// If the test run is cancelled, this will be more than `finished_count` at the end.
    pub initial_run_count: usize,

    /// The total number of tests that were resolved.
    pub finished_count: usize,

    /// The number of tests that built successfully.
    pub compiled: usize,

    /// The number of tests whose iterations all passed.
    pub passed: usize,

    /// The number of tests with at least one failed iteration.
    pub failed: usize,

    /// The number of tests that failed to build.
    pub compile_failed: usize,

    /// The number of iterations run, across all tests.
    pub iterations_run: usize,

    /// The number of iterations that passed, across all tests.
    pub iterations_passed: usize,

    /// Set if the run was cancelled.
    pub cancel_reason: Option<CancelReason>,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run is marked as failed if any of the following are true:
    /// * the run was cancelled: the initial run count is greater than the final run count
    /// * any tests failed to build
    /// * any tests had a failed iteration
    pub fn is_success(&self) -> bool {
        if self.initial_run_count > self.finished_count {
            return false;
        }
        if self.any_failed() {
            return false;
        }
        true
    }

    /// Returns true if any tests failed or failed to build.
    #[inline]
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.compile_failed > 0
    }

    pub(super) fn on_iteration_finished(&mut self, passed: bool) {
        self.iterations_run += 1;
        if passed {
            self.iterations_passed += 1;
        }
    }

    pub(super) fn on_test_finished(&mut self, state: TestState) {
        self.finished_count += 1;
        match state {
            TestState::Success => self.passed += 1,
            TestState::Failure => self.failed += 1,
            TestState::CompileFailure => self.compile_failed += 1,
            TestState::Waiting | TestState::Building | TestState::Running => {
                panic!("test finished in non-terminal state {state}")
            }
        }
    }
}
