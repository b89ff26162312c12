// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The lifecycle of a single test.
//!
//! A [`TestCase`] moves forward through [`TestState`]:
//!
//! ```text
//! Waiting ─▶ Building ─┬─▶ CompileFailure
//!                      └─▶ Running ⟲ ─┬─▶ Success
//!                                     └─▶ Failure
//! ```
//!
//! Transitions are only ever made by the runner's controller, one message at a time. Every
//! transition checks its preconditions and panics if they don't hold: a violation means the
//! controller's bookkeeping is broken, and the run can't continue meaningfully.

use crate::{
    classify::{IterationFailure, Verdict, VerdictKind},
    config::TimeCap,
    discovery::{GOLDEN_EXTENSION, TestFile},
    errors::CommandFailure,
    time::{StopwatchStart, stopwatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use std::{fmt, num::NonZeroUsize, time::Duration};
use thiserror::Error;
use tracing::debug;

/// The index of a test in the run, in sorted name order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TestId(usize);

impl TestId {
    /// Creates a new `TestId`.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The immutable identity of a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestUnit {
    id: TestId,
    name: String,
    path: Utf8PathBuf,
}

impl TestUnit {
    /// Creates a new `TestUnit` from a discovered test file.
    pub fn new(id: TestId, file: TestFile) -> Self {
        Self {
            id,
            name: file.name().to_owned(),
            path: file.path().to_owned(),
        }
    }

    /// Returns the id.
    pub fn id(&self) -> TestId {
        self.id
    }

    /// Returns the name, e.g. `t0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path to the test source.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the path to the golden transcript.
    pub fn golden_path(&self) -> Utf8PathBuf {
        self.path.with_extension(GOLDEN_EXTENSION)
    }
}

/// The state of a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TestState {
    /// Not yet admitted.
    Waiting,

    /// Being built.
    Building,

    /// The build failed. Terminal.
    CompileFailure,

    /// Iterations are being run.
    Running,

    /// Every iteration passed. Terminal.
    Success,

    /// At least one iteration failed. Terminal.
    Failure,
}

impl TestState {
    /// Returns true if no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CompileFailure | Self::Success | Self::Failure)
    }

    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Building)
                | (Self::Building, Self::CompileFailure | Self::Running)
                | (Self::Running, Self::Running | Self::Success | Self::Failure)
        )
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Building => "building",
            Self::CompileFailure => "compile failure",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// The record of one iteration. Unset until the iteration completes.
#[derive(Clone, Debug, Default)]
pub struct Iteration {
    start_time: Option<DateTime<Local>>,
    duration: Duration,
    passed: bool,
    verdict: Option<VerdictKind>,
}

impl Iteration {
    /// When the iteration started, if it has.
    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start_time
    }

    /// How long the iteration took. Zero until it completes.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the iteration passed.
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// The verdict, once the iteration completes.
    pub fn verdict(&self) -> Option<VerdictKind> {
        self.verdict
    }
}

/// The most recent failure of a test.
#[derive(Clone, Debug, Error)]
pub enum TestError {
    /// The build failed.
    #[error(transparent)]
    Build(CommandFailure),

    /// An iteration failed.
    #[error(transparent)]
    Iteration(IterationFailure),
}

/// When to stop iterating a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContinuationPolicy {
    /// The number of configured iterations.
    pub iterations: NonZeroUsize,

    /// Stop after the first failed iteration.
    pub early_exit: bool,

    /// Stop once the recorded time exceeds this.
    pub time_cap: TimeCap,
}

impl ContinuationPolicy {
    /// Decides whether to run another iteration after iteration `index` completed.
    ///
    /// Stop conditions are checked in order: early exit, iterations exhausted, time cap.
    pub fn evaluate(&self, index: usize, passed: bool, elapsed: Duration) -> Continuation {
        if self.early_exit && !passed {
            Continuation::Stop(StopReason::EarlyExit)
        } else if index + 1 >= self.iterations.get() {
            Continuation::Stop(StopReason::IterationsExhausted)
        } else if self.time_cap.is_exceeded_by(elapsed) {
            Continuation::Stop(StopReason::TimeCapExceeded)
        } else {
            Continuation::Continue
        }
    }
}

/// The result of [`ContinuationPolicy::evaluate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Continuation {
    /// Run the next iteration.
    Continue,

    /// Resolve the test.
    Stop(StopReason),
}

/// Why a test stopped iterating.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StopReason {
    /// An iteration failed with early exit enabled.
    EarlyExit,

    /// Every configured iteration ran.
    IterationsExhausted,

    /// The recorded time exceeded the time cap.
    TimeCapExceeded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EarlyExit => "early exit",
            Self::IterationsExhausted => "all iterations run",
            Self::TimeCapExceeded => "time cap exceeded",
        };
        f.write_str(s)
    }
}

/// What the controller should do after a run completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunTransition {
    /// Launch the given iteration next.
    Continue {
        /// The iteration to run.
        next_iteration: usize,
    },

    /// The test is resolved.
    Resolved(StopReason),
}

/// One test and its progress through the run.
#[derive(Clone, Debug)]
pub struct TestCase {
    unit: TestUnit,
    state: TestState,
    iterations: Vec<Iteration>,
    current_iteration: usize,
    running: bool,
    resolved: bool,
    failed: bool,
    last_error: Option<TestError>,
    iteration_stopwatch: Option<StopwatchStart>,
}

impl TestCase {
    /// Creates a new waiting test with room for `iterations` iterations.
    pub fn new(unit: TestUnit, iterations: NonZeroUsize) -> Self {
        Self {
            unit,
            state: TestState::Waiting,
            iterations: vec![Iteration::default(); iterations.get()],
            current_iteration: 0,
            running: false,
            resolved: false,
            failed: false,
            last_error: None,
            iteration_stopwatch: None,
        }
    }

    /// Returns the test's identity.
    pub fn unit(&self) -> &TestUnit {
        &self.unit
    }

    /// Returns the id.
    pub fn id(&self) -> TestId {
        self.unit.id
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.unit.name
    }

    /// Returns the current state.
    pub fn state(&self) -> TestState {
        self.state
    }

    /// Returns the iteration records.
    ///
    /// Once the test is resolved, this only contains the iterations that ran.
    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    /// Returns the index of the iteration in flight, or the last one completed.
    pub fn current_iteration(&self) -> usize {
        self.current_iteration
    }

    /// Returns true while a build or run is outstanding.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns true once no further operations will be scheduled.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Returns the most recent failure.
    pub fn last_error(&self) -> Option<&TestError> {
        self.last_error.as_ref()
    }

    /// Returns the number of iterations that passed.
    pub fn count_passed(&self) -> usize {
        self.iterations.iter().filter(|it| it.passed).count()
    }

    /// Returns the total recorded iteration time.
    pub fn time_elapsed(&self) -> Duration {
        self.iterations.iter().map(|it| it.duration).sum()
    }

    /// Returns the mean duration of the completed iterations, truncated to milliseconds.
    pub fn average_time(&self) -> Duration {
        let (count, total) = self
            .iterations
            .iter()
            .filter(|it| !it.duration.is_zero())
            .fold((0u32, Duration::ZERO), |(count, total), it| {
                (count + 1, total + it.duration)
            });
        if count == 0 {
            return Duration::ZERO;
        }
        let average = total / count;
        Duration::from_millis(average.as_millis() as u64)
    }

    /// `Waiting → Building`.
    pub(crate) fn admit(&mut self) {
        assert!(!self.running, "admitted test {} is not running", self.name());
        self.transition(TestState::Building);
        self.running = true;
    }

    /// `Building → CompileFailure`.
    pub(crate) fn build_failed(&mut self, error: CommandFailure) {
        self.transition(TestState::CompileFailure);
        self.running = false;
        self.resolved = true;
        self.iterations.clear();
        self.last_error = Some(TestError::Build(error));
    }

    /// `Building → Running`: iteration 0 starts.
    pub(crate) fn build_succeeded(&mut self) {
        self.transition(TestState::Running);
        self.current_iteration = 0;
        self.start_iteration();
    }

    /// Records the verdict of `iteration` and decides what happens next.
    pub(crate) fn record_run(
        &mut self,
        iteration: usize,
        verdict: &Verdict,
        policy: &ContinuationPolicy,
    ) -> RunTransition {
        if self.resolved {
            panic!(
                "run completion for test {} which is already resolved ({})",
                self.name(),
                self.state
            );
        }
        if iteration != self.current_iteration {
            panic!(
                "run completion for test {} iteration {iteration}, but iteration {} is current",
                self.name(),
                self.current_iteration
            );
        }
        assert_eq!(
            self.state,
            TestState::Running,
            "run completion for test {} outside the running state",
            self.name()
        );

        let duration = self
            .iteration_stopwatch
            .take()
            .map_or(Duration::ZERO, |sw| sw.snapshot().duration);
        let passed = verdict.is_success();
        let record = &mut self.iterations[iteration];
        record.duration = duration;
        record.passed = passed;
        record.verdict = Some(verdict.kind());

        if let Some(failure) = verdict.failure() {
            self.failed = true;
            self.last_error = Some(TestError::Iteration(failure.clone()));
        }

        match policy.evaluate(iteration, passed, self.time_elapsed()) {
            Continuation::Continue => {
                self.transition(TestState::Running);
                self.current_iteration += 1;
                self.start_iteration();
                RunTransition::Continue {
                    next_iteration: self.current_iteration,
                }
            }
            Continuation::Stop(reason) => {
                let next = if self.failed {
                    TestState::Failure
                } else {
                    TestState::Success
                };
                self.transition(next);
                self.running = false;
                self.resolved = true;
                self.iterations.truncate(self.current_iteration + 1);
                RunTransition::Resolved(reason)
            }
        }
    }

    fn start_iteration(&mut self) {
        let sw = stopwatch();
        self.iterations[self.current_iteration].start_time = Some(sw.start_time());
        self.iteration_stopwatch = Some(sw);
    }

    fn transition(&mut self, next: TestState) {
        if !self.state.can_move_to(next) {
            panic!(
                "invalid transition for test {}: {} -> {next}",
                self.name(),
                self.state
            );
        }
        debug!(test = self.name(), from = %self.state, to = %next, "transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io, sync::Arc};
    use test_case::test_case;

    fn policy(iterations: usize, early_exit: bool, time_cap: TimeCap) -> ContinuationPolicy {
        ContinuationPolicy {
            iterations: NonZeroUsize::new(iterations).unwrap(),
            early_exit,
            time_cap,
        }
    }

    fn make_test(iterations: usize) -> TestCase {
        let file = TestFile::new("/work/tests/t0.cc").unwrap();
        TestCase::new(
            TestUnit::new(TestId::new(0), file),
            NonZeroUsize::new(iterations).unwrap(),
        )
    }

    #[test_case("/work/tests/t0.cc", "/work/tests/t0.ok"; "source file")]
    #[test_case("/work/tests/t1.dir", "/work/tests/t1.ok"; "test directory")]
    fn golden_path_replaces_extension(path: &str, golden: &str) {
        let unit = TestUnit::new(TestId::new(0), TestFile::new(path).unwrap());
        assert_eq!(unit.golden_path(), golden);
    }

    fn timeout() -> Verdict {
        IterationFailure::Timeout {
            timeout: Duration::from_secs(5),
        }
        .into()
    }

    #[test_case(policy(3, true, TimeCap::Unlimited), 0, false, Continuation::Stop(StopReason::EarlyExit); "early exit on failure")]
    #[test_case(policy(3, true, TimeCap::Unlimited), 0, true, Continuation::Continue; "early exit ignores pass")]
    #[test_case(policy(3, false, TimeCap::Unlimited), 0, false, Continuation::Continue; "failure without early exit")]
    #[test_case(policy(3, false, TimeCap::Unlimited), 2, true, Continuation::Stop(StopReason::IterationsExhausted); "last iteration")]
    #[test_case(policy(1, true, TimeCap::Unlimited), 0, false, Continuation::Stop(StopReason::EarlyExit); "early exit checked first")]
    #[test_case(
        policy(5, false, TimeCap::Limit(Duration::from_secs(1))), 1, true,
        Continuation::Stop(StopReason::TimeCapExceeded)
        ; "time cap"
    )]
    fn continuation(
        policy: ContinuationPolicy,
        index: usize,
        passed: bool,
        expected: Continuation,
    ) {
        assert_eq!(
            policy.evaluate(index, passed, Duration::from_millis(1500)),
            expected
        );
    }

    #[test]
    fn forward_lifecycle() {
        let mut test = make_test(2);
        assert_eq!(test.state(), TestState::Waiting);

        test.admit();
        assert_eq!(test.state(), TestState::Building);
        assert!(test.is_running());

        test.build_succeeded();
        assert_eq!(test.state(), TestState::Running);
        assert!(test.iterations()[0].start_time().is_some());

        let policy = policy(2, false, TimeCap::Unlimited);
        assert_eq!(
            test.record_run(0, &timeout(), &policy),
            RunTransition::Continue { next_iteration: 1 }
        );
        assert!(test.is_running());
        assert_eq!(
            test.record_run(1, &Verdict::Success, &policy),
            RunTransition::Resolved(StopReason::IterationsExhausted)
        );

        // An earlier failure sticks even though the last iteration passed.
        assert_eq!(test.state(), TestState::Failure);
        assert!(test.is_resolved());
        assert!(!test.is_running());
        assert_eq!(test.count_passed(), 1);
        assert_eq!(test.iterations().len(), 2);
        assert_eq!(
            test.iterations()[0].verdict(),
            Some(VerdictKind::Timeout)
        );
        assert!(matches!(
            test.last_error(),
            Some(TestError::Iteration(IterationFailure::Timeout { .. }))
        ));
    }

    #[test]
    fn early_exit_truncates_iterations() {
        let mut test = make_test(5);
        test.admit();
        test.build_succeeded();

        let transition = test.record_run(0, &timeout(), &policy(5, true, TimeCap::Unlimited));
        assert_eq!(transition, RunTransition::Resolved(StopReason::EarlyExit));
        assert_eq!(test.state(), TestState::Failure);
        assert_eq!(test.iterations().len(), 1);
    }

    #[test]
    fn compile_failure_is_terminal() {
        let mut test = make_test(3);
        test.admit();
        test.build_failed(CommandFailure::Spawn {
            command: "make t0".to_owned(),
            error: Arc::new(io::Error::from(io::ErrorKind::NotFound)),
        });

        assert_eq!(test.state(), TestState::CompileFailure);
        assert!(test.is_resolved());
        assert!(!test.is_running());
        assert!(test.iterations().is_empty());
        assert!(matches!(test.last_error(), Some(TestError::Build(_))));
    }

    #[test]
    #[should_panic(expected = "already resolved")]
    fn run_completion_after_resolution_panics() {
        let mut test = make_test(1);
        test.admit();
        test.build_succeeded();
        let policy = policy(1, false, TimeCap::Unlimited);
        let _ = test.record_run(0, &Verdict::Success, &policy);
        let _ = test.record_run(0, &Verdict::Success, &policy);
    }

    #[test]
    #[should_panic(expected = "iteration 1 is current")]
    fn stale_iteration_panics() {
        let mut test = make_test(3);
        test.admit();
        test.build_succeeded();
        let policy = policy(3, false, TimeCap::Unlimited);
        let _ = test.record_run(0, &Verdict::Success, &policy);
        let _ = test.record_run(0, &Verdict::Success, &policy);
    }

    #[test]
    #[should_panic(expected = "invalid transition")]
    fn build_result_for_waiting_test_panics() {
        let mut test = make_test(1);
        test.build_succeeded();
    }

    #[test]
    fn average_time_skips_unfinished_iterations() {
        let mut test = make_test(3);
        test.iterations[0].duration = Duration::from_micros(1_500_700);
        test.iterations[1].duration = Duration::from_millis(500);
        assert_eq!(test.average_time(), Duration::from_millis(1000));
        assert_eq!(test.time_elapsed(), Duration::from_micros(2_000_700));
    }
}
