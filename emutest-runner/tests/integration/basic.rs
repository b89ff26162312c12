// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use emutest_runner::{
    classify::VerdictKind,
    config::MaxConcurrency,
    reporter::events::TestEventKind,
    runner::TestRunnerBuilder,
    test_case::{TestError, TestState},
};
use pretty_assertions::assert_eq;
use std::num::NonZeroUsize;
use test_case::test_case;

#[test_case("pass0", TestState::Success, VerdictKind::Success; "matching transcript")]
#[test_case("mismatch0", TestState::Failure, VerdictKind::DiffMismatch; "diff mismatch")]
#[test_case("unimplemented0", TestState::Failure, VerdictKind::Unimplemented; "missing code")]
#[test_case("silent0", TestState::Failure, VerdictKind::EmptyOutput; "empty output")]
#[test_case("crash0", TestState::Failure, VerdictKind::Crash; "unconventional exit code")]
#[test_case("hang0", TestState::Failure, VerdictKind::Timeout; "run deadline")]
fn single_test_verdict(name: &str, state: TestState, verdict: VerdictKind) -> Result<()> {
    test_init();
    let project = Project::new(&[name])?;
    let outcome = project.run(TestRunnerBuilder::default())?;

    let test = outcome.test(name);
    assert_eq!(test.state(), state);
    assert_eq!(test.iterations().len(), 1);
    assert_eq!(test.iterations()[0].verdict(), Some(verdict));
    assert_eq!(outcome.run_stats.is_success(), state == TestState::Success);

    // The raw capture is written for every launched run.
    assert!(project.root().join(format!("{name}.raw")).is_file());
    Ok(())
}

#[test]
fn side_files_are_written() -> Result<()> {
    test_init();
    let project = Project::new(&["pass0", "mismatch0"])?;
    project.run(TestRunnerBuilder::default())?;
    let root = project.root();

    let raw = std::fs::read_to_string(root.join("pass0.raw"))?;
    assert!(raw.starts_with("SeaBIOS\n"), "raw capture is unfiltered: {raw:?}");
    assert_eq!(std::fs::read_to_string(root.join("pass0.out"))?, GOLDEN);
    assert!(!root.join("pass0.diff").exists());

    assert_eq!(
        std::fs::read_to_string(root.join("mismatch0.out"))?,
        "*** hello\n*** goodbye\n"
    );
    let diff = std::fs::read_to_string(root.join("mismatch0.diff"))?;
    assert!(diff.contains("goodbye"), "diff mentions the extra line: {diff:?}");
    Ok(())
}

#[test]
fn stale_diff_is_removed_before_build() -> Result<()> {
    test_init();
    let project = Project::new(&["pass0"])?;
    std::fs::write(project.root().join("pass0.diff"), "old diff\n")?;

    project.run(TestRunnerBuilder::default())?;
    assert!(!project.root().join("pass0.diff").exists());
    Ok(())
}

#[test]
fn compile_failure_is_terminal() -> Result<()> {
    test_init();
    let project = Project::new(&["broken0", "pass0"])?;
    let outcome = project.run(TestRunnerBuilder::default())?;

    let broken = outcome.test("broken0");
    assert_eq!(broken.state(), TestState::CompileFailure);
    assert!(broken.iterations().is_empty());
    let Some(TestError::Build(failure)) = broken.last_error() else {
        panic!("expected a build error, found {:?}", broken.last_error());
    };
    assert!(
        failure.to_string().contains("broken0.cc:1: error"),
        "build stderr is included: {failure}"
    );

    assert_eq!(outcome.test("pass0").state(), TestState::Success);
    assert_eq!(outcome.run_stats.compile_failed, 1);
    assert_eq!(outcome.run_stats.passed, 1);
    Ok(())
}

#[test]
fn repeated_iterations_with_concurrency_limit() -> Result<()> {
    test_init();
    let project = Project::new(&["pass0", "pass1", "pass2"])?;
    let mut builder = TestRunnerBuilder::default();
    builder
        .set_max_concurrency(MaxConcurrency::Count(2))
        .set_iterations(NonZeroUsize::new(3).unwrap());
    let outcome = project.run(builder)?;

    for name in ["pass0", "pass1", "pass2"] {
        let test = outcome.test(name);
        assert_eq!(test.state(), TestState::Success);
        assert_eq!(test.count_passed(), 3);
    }
    assert_eq!(outcome.run_stats.iterations_run, 9);

    let max_running = outcome
        .events
        .iter()
        .filter_map(|event| match event.kind {
            TestEventKind::TestBuildStarted { running, .. } => Some(running),
            _ => None,
        })
        .max();
    assert_eq!(max_running, Some(2));
    Ok(())
}

#[test]
fn early_exit_stops_failing_test() -> Result<()> {
    test_init();
    let project = Project::new(&["mismatch0"])?;
    let mut builder = TestRunnerBuilder::default();
    builder
        .set_iterations(NonZeroUsize::new(5).unwrap())
        .set_early_exit(true);
    let outcome = project.run(builder)?;

    let test = outcome.test("mismatch0");
    assert_eq!(test.state(), TestState::Failure);
    assert_eq!(test.iterations().len(), 1);
    Ok(())
}

#[test]
fn dependency_failure_is_fatal() -> Result<()> {
    test_init();
    let project = Project::new(&["pass0"])?;
    // A build tool that always fails.
    std::fs::write(
        project.root().join("fake-make"),
        "#!/bin/sh\necho 'kernel: no rule' >&2\nexit 2\n",
    )?;

    let error = project
        .run(TestRunnerBuilder::default())
        .expect_err("dependency build should fail");
    assert!(
        error
            .chain()
            .any(|cause| cause.to_string().contains("kernel: no rule")),
        "build stderr is included: {error:?}"
    );
    Ok(())
}
