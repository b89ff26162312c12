// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events for the reporter.
//!
//! These types form the interface between the test runner and the reporter. The runner emits
//! them, in order, through the callback passed to
//! [`TestRunner::execute`](crate::runner::TestRunner::execute).

use crate::{
    classify::Verdict,
    runner::RunStats,
    test_case::{StopReason, TestCase, TestUnit},
};
use chrono::{DateTime, Local};
use std::{num::NonZeroUsize, time::Duration};

/// A test event.
#[derive(Clone, Debug)]
pub struct TestEvent {
    /// The time at which the event was generated.
    pub timestamp: DateTime<Local>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: TestEventKind,
}

/// The kind of test event this is.
#[derive(Clone, Debug)]
pub enum TestEventKind {
    /// The run started.
    RunStarted {
        /// The number of tests.
        test_count: usize,

        /// The maximum number of tests building or running at once.
        max_concurrency: usize,

        /// The number of iterations per test.
        iterations: NonZeroUsize,
    },

    /// Shared dependencies were built.
    DependenciesBuilt {
        /// How long the build took.
        time_taken: Duration,
    },

    /// A test was admitted and its build started.
    TestBuildStarted {
        /// The test.
        test: TestUnit,

        /// The number of tests building or running, including this one.
        running: usize,
    },

    /// A test failed to build. It is resolved.
    TestCompileFailed {
        /// The test, in its final state.
        test: TestCase,

        /// Current statistics for the run.
        current_stats: RunStats,

        /// The number of tests still building or running.
        running: usize,
    },

    /// An iteration of a test started.
    IterationStarted {
        /// The test.
        test: TestUnit,

        /// The zero-based iteration index.
        iteration: usize,

        /// The number of configured iterations.
        total: NonZeroUsize,
    },

    /// An iteration of a test finished.
    IterationFinished {
        /// The test.
        test: TestUnit,

        /// The zero-based iteration index.
        iteration: usize,

        /// The number of configured iterations.
        total: NonZeroUsize,

        /// The verdict.
        verdict: Verdict,

        /// How long the iteration took.
        time_taken: Duration,

        /// The number of iterations of this test that passed so far.
        passed: usize,
    },

    /// A test stopped iterating. It is resolved.
    TestFinished {
        /// The test, in its final state.
        test: TestCase,

        /// Why the test stopped iterating.
        stop_reason: StopReason,

        /// Current statistics for the run.
        current_stats: RunStats,

        /// The number of tests still building or running.
        running: usize,
    },

    /// A cancellation notice was received.
    RunBeginCancel {
        /// The number of tests still building or running.
        running: usize,

        /// The reason this run was cancelled.
        reason: CancelReason,
    },

    /// A second cancellation notice was received: in-flight operations are dropped.
    RunBeginKill {
        /// The number of tests still building or running.
        running: usize,
    },

    /// The run finished.
    RunFinished {
        /// The time at which the run was started.
        start_time: DateTime<Local>,

        /// The amount of time it took for the run to complete.
        elapsed: Duration,

        /// Statistics for the run.
        run_stats: RunStats,
    },
}

/// The reason why a test run is being cancelled.
//
// Note: the order here matters -- it indicates severity of cancellation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CancelReason {
    /// A termination signal (on Unix, SIGTERM or SIGHUP) was received.
    Signal,

    /// An interrupt (on Unix, Ctrl-C) was received.
    Interrupt,
}

impl CancelReason {
    pub(crate) fn to_static_str(self) -> &'static str {
        match self {
            CancelReason::Signal => "signal",
            CancelReason::Interrupt => "interrupt",
        }
    }
}
