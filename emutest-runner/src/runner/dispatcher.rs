// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The controller for a test run.
//!
//! [`DispatcherContext`] is the only place test state is mutated. It handles one
//! [`InternalEvent`] at a time and tells the caller which operations to launch, or that the run
//! should be cancelled. It never awaits anything itself.

use super::{
    RunSettings, RunStats,
    internal_events::{ControlEvent, ExecutorEvent, InternalEvent, Operation},
    scheduler,
};
use crate::{
    classify::Verdict,
    errors::CommandFailure,
    reporter::events::{CancelReason, TestEvent, TestEventKind},
    signal::ShutdownEvent,
    test_case::{RunTransition, TestCase, TestId, TestUnit},
    time::{StopwatchStart, stopwatch},
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use std::{collections::VecDeque, time::Duration};
use tracing::debug;

/// Context for the dispatcher.
///
/// This struct is responsible for coordinating events from the executor tasks and signals, and
/// for invoking the reporter callback.
#[derive(Debug)]
pub(super) struct DispatcherContext<F> {
    callback: DebugIgnore<F>,
    stopwatch: StopwatchStart,
    tests: Vec<TestCase>,
    settings: RunSettings,
    run_stats: RunStats,
    cancel_state: Option<CancelReason>,
    signal_count: Option<SignalCount>,
    control_queue: VecDeque<ControlEvent>,
}

impl<F> DispatcherContext<F>
where
    F: FnMut(TestEvent),
{
    pub(super) fn new(callback: F, tests: Vec<TestCase>, settings: RunSettings) -> Self {
        let initial_run_count = tests.len();
        Self {
            callback: DebugIgnore(callback),
            stopwatch: stopwatch(),
            tests,
            settings,
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            cancel_state: None,
            signal_count: None,
            control_queue: VecDeque::new(),
        }
    }

    pub(super) fn run_started(&mut self) {
        self.basic_callback(TestEventKind::RunStarted {
            test_count: self.tests.len(),
            max_concurrency: self.settings.max_concurrency,
            iterations: self.settings.policy.iterations,
        });
    }

    pub(super) fn dependencies_built(&mut self, time_taken: Duration) {
        self.basic_callback(TestEventKind::DependenciesBuilt { time_taken });
        self.control_queue.push_back(ControlEvent::AdmitMore);
    }

    /// Returns the next message the dispatcher posted to itself, if any.
    pub(super) fn next_control_event(&mut self) -> Option<ControlEvent> {
        self.control_queue.pop_front()
    }

    pub(super) fn unit(&self, id: TestId) -> &TestUnit {
        self.tests[id.index()].unit()
    }

    pub(super) fn all_resolved(&self) -> bool {
        self.tests.iter().all(TestCase::is_resolved)
    }

    pub(super) fn handle_event(&mut self, event: InternalEvent) -> HandleEventResponse {
        match event {
            InternalEvent::Control(ControlEvent::AdmitMore) => self.admit_more(),
            InternalEvent::Executor(ExecutorEvent::BuildSucceeded { id }) => {
                self.build_succeeded(id)
            }
            InternalEvent::Executor(ExecutorEvent::BuildFailed { id, error }) => {
                self.build_failed(id, error)
            }
            InternalEvent::Executor(ExecutorEvent::RunFinished {
                id,
                iteration,
                verdict,
            }) => self.run_finished_for(id, iteration, verdict),
            InternalEvent::Signal(event) => self.handle_signal_event(event),
        }
    }

    fn admit_more(&mut self) -> HandleEventResponse {
        if self.cancel_state.is_some() {
            return HandleEventResponse::None;
        }

        let admitted = scheduler::select_admissions(&self.tests, self.settings.max_concurrency);
        let mut ops = Vec::with_capacity(admitted.len());
        for id in admitted {
            self.tests[id.index()].admit();
            let test = self.tests[id.index()].unit().clone();
            let running = self.running();
            debug_assert!(
                running <= self.settings.max_concurrency,
                "running ({running}) exceeds max concurrency ({})",
                self.settings.max_concurrency
            );
            self.basic_callback(TestEventKind::TestBuildStarted { test, running });
            ops.push(Operation::Build { id });
        }

        HandleEventResponse::Launch(ops)
    }

    fn build_succeeded(&mut self, id: TestId) -> HandleEventResponse {
        let test = &mut self.tests[id.index()];
        test.build_succeeded();
        let unit = test.unit().clone();
        self.run_stats.compiled += 1;
        self.start_run(unit, 0)
    }

    /// Reports and launches an iteration, unless the run is being cancelled.
    fn start_run(&mut self, test: TestUnit, iteration: usize) -> HandleEventResponse {
        if self.cancel_state.is_some() {
            return HandleEventResponse::None;
        }

        let id = test.id();
        self.basic_callback(TestEventKind::IterationStarted {
            test,
            iteration,
            total: self.settings.policy.iterations,
        });
        HandleEventResponse::Launch(vec![Operation::Run {
            id,
            iteration,
            timeout: self.settings.run_timeout,
        }])
    }

    fn build_failed(&mut self, id: TestId, error: CommandFailure) -> HandleEventResponse {
        let test = &mut self.tests[id.index()];
        test.build_failed(error);
        let test = test.clone();
        self.run_stats.on_test_finished(test.state());

        let running = self.running();
        self.basic_callback(TestEventKind::TestCompileFailed {
            test,
            current_stats: self.run_stats,
            running,
        });
        self.control_queue.push_back(ControlEvent::AdmitMore);
        HandleEventResponse::None
    }

    fn run_finished_for(
        &mut self,
        id: TestId,
        iteration: usize,
        verdict: Verdict,
    ) -> HandleEventResponse {
        let policy = self.settings.policy;
        let test = &mut self.tests[id.index()];
        let transition = test.record_run(iteration, &verdict, &policy);
        let time_taken = test
            .iterations()
            .get(iteration)
            .map_or(Duration::ZERO, |it| it.duration());
        let passed = test.count_passed();
        let unit = test.unit().clone();

        self.run_stats.on_iteration_finished(verdict.is_success());
        self.basic_callback(TestEventKind::IterationFinished {
            test: unit.clone(),
            iteration,
            total: policy.iterations,
            verdict,
            time_taken,
            passed,
        });

        match transition {
            RunTransition::Continue { next_iteration } => self.start_run(unit, next_iteration),
            RunTransition::Resolved(stop_reason) => {
                let test = self.tests[id.index()].clone();
                self.run_stats.on_test_finished(test.state());
                debug!(test = test.name(), %stop_reason, "test resolved");

                let running = self.running();
                self.basic_callback(TestEventKind::TestFinished {
                    test,
                    stop_reason,
                    current_stats: self.run_stats,
                    running,
                });
                self.control_queue.push_back(ControlEvent::AdmitMore);
                HandleEventResponse::None
            }
        }
    }

    fn handle_signal_event(&mut self, event: ShutdownEvent) -> HandleEventResponse {
        match self.increment_signal_count() {
            SignalCount::Once => self.begin_cancel(event_to_cancel_reason(event)),
            SignalCount::Twice => {
                // Forcibly drop in-flight operations in the case of a second signal.
                self.basic_callback(TestEventKind::RunBeginKill {
                    running: self.running(),
                });
                HandleEventResponse::Cancel(CancelEvent::Kill)
            }
        }
    }

    fn increment_signal_count(&mut self) -> SignalCount {
        let new_count = match self.signal_count {
            None => SignalCount::Once,
            Some(SignalCount::Once | SignalCount::Twice) => SignalCount::Twice,
        };
        self.signal_count = Some(new_count);
        new_count
    }

    /// Begins cancellation of a test run. Reports it if the current cancel state is less severe
    /// than the requested one.
    fn begin_cancel(&mut self, reason: CancelReason) -> HandleEventResponse {
        if self.cancel_state < Some(reason) {
            self.cancel_state = Some(reason);
            self.run_stats.cancel_reason = Some(reason);
            self.basic_callback(TestEventKind::RunBeginCancel {
                running: self.running(),
                reason,
            });
            HandleEventResponse::Cancel(CancelEvent::Graceful)
        } else {
            HandleEventResponse::None
        }
    }

    pub(super) fn run_finished(&mut self) {
        let snapshot = self.stopwatch.snapshot();
        self.basic_callback(TestEventKind::RunFinished {
            start_time: snapshot.start_time,
            elapsed: snapshot.duration,
            run_stats: self.run_stats,
        });
    }

    pub(super) fn run_stats(&self) -> RunStats {
        self.run_stats
    }

    fn running(&self) -> usize {
        self.tests.iter().filter(|test| test.is_running()).count()
    }

    fn basic_callback(&mut self, kind: TestEventKind) {
        let snapshot = self.stopwatch.snapshot();
        let event = TestEvent {
            timestamp: Local::now(),
            elapsed: snapshot.duration,
            kind,
        };
        (self.callback)(event);
    }
}

fn event_to_cancel_reason(event: ShutdownEvent) -> CancelReason {
    match event {
        #[cfg(unix)]
        ShutdownEvent::Hangup | ShutdownEvent::Term => CancelReason::Signal,
        ShutdownEvent::Interrupt => CancelReason::Interrupt,
    }
}

/// The return result of `handle_event`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[must_use = "this enum should not be dropped on the floor"]
pub(super) enum HandleEventResponse {
    /// Launch these operations.
    Launch(Vec<Operation>),

    /// Cancel the run.
    Cancel(CancelEvent),

    /// No response.
    None,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum CancelEvent {
    /// Signal in-flight operations to stop, then wait for them.
    Graceful,

    /// Drop in-flight operations right away.
    Kill,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum SignalCount {
    Once,
    Twice,
}
