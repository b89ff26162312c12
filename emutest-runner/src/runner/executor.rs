// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching builds and runs as tasks.
//!
//! The [`TestExecutor`] trait is the boundary between the runner and the outside world: it knows
//! how to build and run one test. [`ExecutorContext`] spawns one task per operation and relays
//! each result back to the dispatcher as a single [`ExecutorEvent`].

use super::internal_events::{ExecutorEvent, Operation};
use crate::{
    classify::Verdict,
    errors::{CommandFailure, DependencyBuildError},
    process::{CancelSignal, Cancelled},
    test_case::TestUnit,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc::UnboundedSender},
    task::{JoinError, JoinSet},
};
use tracing::debug;

/// The result of building a single test.
pub type BuildResult = Result<(), CommandFailure>;

/// Performs the external operations of a test run.
///
/// Every method observes `cancel`, and returns `Err(Cancelled)` promptly once it fires, after
/// killing anything it started.
pub trait TestExecutor: Send + Sync + 'static {
    /// Builds the dependencies shared by all tests. Called once, before any test is built.
    fn build_dependencies(
        &self,
        cancel: &mut CancelSignal,
    ) -> impl Future<Output = Result<Result<(), DependencyBuildError>, Cancelled>> + Send;

    /// Builds a single test.
    fn build_test(
        &self,
        test: &TestUnit,
        cancel: &mut CancelSignal,
    ) -> impl Future<Output = Result<BuildResult, Cancelled>> + Send;

    /// Runs one iteration of a built test and classifies its output.
    fn run_test(
        &self,
        test: &TestUnit,
        iteration: usize,
        timeout: Duration,
        cancel: &mut CancelSignal,
    ) -> impl Future<Output = Result<Verdict, Cancelled>> + Send;
}

/// Owns the tasks spawned for a run, and the global cancellation signal.
#[derive(Debug)]
pub(super) struct ExecutorContext<E> {
    executor: Arc<E>,
    event_tx: UnboundedSender<ExecutorEvent>,
    cancel_sender: broadcast::Sender<()>,
    tasks: JoinSet<()>,
}

impl<E: TestExecutor> ExecutorContext<E> {
    pub(super) fn new(executor: Arc<E>, event_tx: UnboundedSender<ExecutorEvent>) -> Self {
        let (cancel_sender, _) = broadcast::channel(1);
        Self {
            executor,
            event_tx,
            cancel_sender,
            tasks: JoinSet::new(),
        }
    }

    fn cancel_signal(&self) -> CancelSignal {
        CancelSignal::new(self.cancel_sender.subscribe())
    }

    /// Builds shared dependencies. Unlike other operations, this is awaited in place.
    pub(super) async fn build_dependencies(
        &self,
    ) -> Result<Result<(), DependencyBuildError>, Cancelled> {
        let mut cancel = self.cancel_signal();
        self.executor.build_dependencies(&mut cancel).await
    }

    /// Spawns a task for `op`.
    pub(super) fn launch(&mut self, op: Operation, unit: TestUnit) {
        let executor = self.executor.clone();
        let event_tx = self.event_tx.clone();
        let mut cancel = self.cancel_signal();

        match op {
            Operation::Build { id } => {
                debug!(test = unit.name(), "launching build");
                self.tasks.spawn(async move {
                    let Ok(result) = executor.build_test(&unit, &mut cancel).await else {
                        return;
                    };
                    let event = match result {
                        Ok(()) => ExecutorEvent::BuildSucceeded { id },
                        Err(error) => ExecutorEvent::BuildFailed { id, error },
                    };
                    // The receiver only goes away once the run is over.
                    let _ = event_tx.send(event);
                });
            }
            Operation::Run {
                id,
                iteration,
                timeout,
            } => {
                debug!(test = unit.name(), iteration, "launching run");
                self.tasks.spawn(async move {
                    let Ok(verdict) = executor
                        .run_test(&unit, iteration, timeout, &mut cancel)
                        .await
                    else {
                        return;
                    };
                    let _ = event_tx.send(ExecutorEvent::RunFinished {
                        id,
                        iteration,
                        verdict,
                    });
                });
            }
        }
    }

    /// Signals every in-flight operation to stop.
    pub(super) fn cancel(&self) {
        // This fails if there are no receivers, i.e. nothing is in flight.
        let _ = self.cancel_sender.send(());
    }

    /// Drops every in-flight task. Their children are killed on drop.
    pub(super) fn abort_all(&mut self) {
        self.tasks.abort_all();
    }

    pub(super) fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Waits for the next task to exit.
    pub(super) async fn join_next(&mut self) -> Option<Result<(), JoinError>> {
        self.tasks.join_next().await
    }
}

/// Propagates a panic from an executor task.
pub(super) fn check_join_result(res: Result<(), JoinError>) {
    if let Err(error) = res {
        if error.is_panic() {
            std::panic::resume_unwind(error.into_panic());
        }
        // Cancelled tasks were aborted on purpose.
    }
}
