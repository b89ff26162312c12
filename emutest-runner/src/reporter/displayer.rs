// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints test events to a terminal, one line per transition.

use super::events::{TestEvent, TestEventKind};
use crate::{
    classify::{IterationFailure, Verdict, VerdictKind},
    helpers::{FormattedDuration, plural},
    runner::RunStats,
    test_case::{StopReason, TestCase, TestState},
};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    num::NonZeroUsize,
    time::Duration,
};

/// Test reporter builder.
#[derive(Debug, Default)]
pub struct TestReporterBuilder {
    verbose: bool,
    should_colorize: bool,
}

impl TestReporterBuilder {
    /// Sets verbose output: error details are printed in full, and every iteration is reported.
    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Set to true if the reporter should colorize output.
    pub fn set_colorize(&mut self, should_colorize: bool) -> &mut Self {
        self.should_colorize = should_colorize;
        self
    }

    /// Creates a new test reporter writing to `writer`.
    pub fn build<W: Write>(&self, writer: W) -> TestReporter<W> {
        let mut styles = Box::<Styles>::default();
        if self.should_colorize {
            styles.colorize();
        }

        TestReporter {
            writer,
            styles,
            verbose: self.verbose,
            iterations: None,
        }
    }
}

/// Writes human-readable test events.
pub struct TestReporter<W> {
    writer: W,
    styles: Box<Styles>,
    verbose: bool,
    iterations: Option<NonZeroUsize>,
}

impl<W: Write> TestReporter<W> {
    /// Reports a test event.
    pub fn report_event(&mut self, event: &TestEvent) -> io::Result<()> {
        self.write_event_impl(event)?;
        self.writer.flush()
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event_impl(&mut self, event: &TestEvent) -> io::Result<()> {
        let styles = &*self.styles;
        let writer = &mut self.writer;

        match &event.kind {
            TestEventKind::RunStarted {
                test_count,
                max_concurrency,
                iterations,
            } => {
                self.iterations = Some(*iterations);

                write!(writer, "{:>12} ", "Starting".style(styles.pass))?;
                write!(
                    writer,
                    "{} {}",
                    test_count.style(styles.count),
                    plural::tests_str(*test_count),
                )?;
                if iterations.get() > 1 {
                    write!(
                        writer,
                        " x {} {}",
                        iterations.style(styles.count),
                        plural::iterations_str(iterations.get()),
                    )?;
                }
                writeln!(
                    writer,
                    " ({} at a time)",
                    max_concurrency.style(styles.count)
                )?;
            }
            TestEventKind::DependenciesBuilt { time_taken } => {
                write!(writer, "{:>12} ", "BUILT".style(styles.pass))?;
                write_duration(*time_taken, writer)?;
                writeln!(writer, "dependencies")?;
            }
            TestEventKind::TestBuildStarted { test, running: _ } => {
                if self.verbose {
                    writeln!(
                        writer,
                        "{:>12} {}",
                        "BUILDING".style(styles.pass),
                        test.name().style(styles.test_name),
                    )?;
                }
            }
            TestEventKind::TestCompileFailed { test, .. } => {
                write!(writer, "{:>12} ", "COMPILE FAIL".style(styles.skip))?;
                writeln!(writer, "{}", test.name().style(styles.test_name))?;
                write_error(test, self.verbose, styles, writer)?;
            }
            TestEventKind::IterationStarted {
                test,
                iteration,
                total,
            } => {
                if self.verbose {
                    write!(writer, "{:>12} ", "RUNNING".style(styles.pass))?;
                    writeln!(
                        writer,
                        "{} {}",
                        test.name().style(styles.test_name),
                        iteration_str(*iteration, *total).style(styles.count),
                    )?;
                }
            }
            TestEventKind::IterationFinished {
                test,
                iteration,
                total,
                verdict,
                time_taken,
                passed: _,
            } => {
                if self.verbose || total.get() > 1 {
                    let style = if verdict.is_success() {
                        styles.pass
                    } else {
                        styles.fail
                    };
                    write!(writer, "{:>12} ", status_str(verdict.kind()).style(style))?;
                    write_duration(*time_taken, writer)?;
                    writeln!(
                        writer,
                        "{} {}",
                        test.name().style(styles.test_name),
                        iteration_str(*iteration, *total).style(styles.count),
                    )?;
                    if self.verbose {
                        write_verdict_detail(verdict, writer)?;
                    }
                }
            }
            TestEventKind::TestFinished {
                test, stop_reason, ..
            } => {
                let (label, style) = match test.state() {
                    TestState::Success => ("SUCCESS", styles.pass),
                    _ => ("FAILURE", styles.fail),
                };
                write!(writer, "{:>12} ", label.style(style))?;
                write_duration(test.average_time(), writer)?;
                write!(writer, "{}", test.name().style(styles.test_name))?;

                let run = test.iterations().len();
                if self.iterations.is_some_and(|total| total.get() > 1) {
                    write!(
                        writer,
                        " {}",
                        format!("({}/{run})", test.count_passed()).style(styles.count),
                    )?;
                }
                if *stop_reason != StopReason::IterationsExhausted {
                    write!(writer, " ({stop_reason})")?;
                }
                writeln!(writer)?;

                if test.state() == TestState::Failure {
                    write_error(test, self.verbose, styles, writer)?;
                }
            }
            TestEventKind::RunBeginCancel { running, reason } => {
                write!(
                    writer,
                    "{:>12} due to {}",
                    "Cancelling".style(styles.fail),
                    reason.to_static_str().style(styles.fail)
                )?;
                if *running > 0 {
                    write!(
                        writer,
                        ": {} {} still running",
                        running.style(styles.count),
                        plural::tests_str(*running),
                    )?;
                }
                writeln!(writer)?;
            }
            TestEventKind::RunBeginKill { running } => {
                write!(
                    writer,
                    "{:>12} due to {}",
                    "Killing".style(styles.fail),
                    "second signal".style(styles.fail),
                )?;
                if *running > 0 {
                    write!(
                        writer,
                        ": {} {} still running",
                        running.style(styles.count),
                        plural::tests_str(*running),
                    )?;
                }
                writeln!(writer)?;
            }
            TestEventKind::RunFinished {
                start_time: _,
                elapsed,
                run_stats,
            } => {
                write_summary(run_stats, *elapsed, styles, writer)?;
            }
        }

        Ok(())
    }
}

fn write_summary(
    run_stats: &RunStats,
    elapsed: Duration,
    styles: &Styles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let summary_style = if run_stats.is_success() {
        styles.pass
    } else {
        styles.fail
    };
    write!(writer, "------------\n{:>12} ", "Summary".style(summary_style))?;
    write_duration(elapsed, writer)?;

    // Tests that failed to build are left out of the denominator.
    let compiled = run_stats.initial_run_count - run_stats.compile_failed;
    writeln!(
        writer,
        "{}/{} test cases passed.",
        run_stats.passed.style(styles.count),
        compiled.style(styles.count),
    )?;

    if run_stats.compile_failed > 0 {
        writeln!(
            writer,
            "{:>12} {} {} did not compile",
            "",
            run_stats.compile_failed.style(styles.count),
            plural::tests_str(run_stats.compile_failed),
        )?;
    }
    if run_stats.iterations_run > 0 {
        writeln!(
            writer,
            "{:>12} {}/{} {} passed",
            "",
            run_stats.iterations_passed.style(styles.count),
            run_stats.iterations_run.style(styles.count),
            plural::iterations_str(run_stats.iterations_run),
        )?;
    }
    if let Some(reason) = run_stats.cancel_reason {
        let unfinished = run_stats.initial_run_count - run_stats.finished_count;
        writeln!(
            writer,
            "{:>12} terminated due to {}: {} {} {} not finished",
            "",
            reason.to_static_str().style(styles.fail),
            unfinished.style(styles.count),
            plural::tests_str(unfinished),
            plural::were_str(unfinished),
        )?;
    }
    Ok(())
}

/// Prints the last error of a test: its first line, or all of it in verbose mode.
fn write_error(
    test: &TestCase,
    verbose: bool,
    styles: &Styles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let Some(error) = test.last_error() else {
        return Ok(());
    };
    let message = error.to_string();
    let shown = if verbose {
        message.as_str()
    } else {
        message.lines().next().unwrap_or_default()
    };
    for line in shown.lines() {
        writeln!(writer, "{:>12} {}", "", line.style(styles.fail_output))?;
    }
    Ok(())
}

/// In verbose mode, prints the diff for a mismatched transcript.
fn write_verdict_detail(verdict: &Verdict, writer: &mut dyn Write) -> io::Result<()> {
    if let Some(IterationFailure::DiffMismatch { diff, .. }) = verdict.failure() {
        for line in diff.lines() {
            writeln!(writer, "{:>12} {line}", "")?;
        }
    }
    Ok(())
}

fn write_duration(duration: Duration, writer: &mut dyn Write) -> io::Result<()> {
    // * > means right-align.
    // * 9 is the number of characters to pad to.
    write!(writer, "[{:>9}] ", FormattedDuration(duration).to_string())
}

fn iteration_str(iteration: usize, total: NonZeroUsize) -> String {
    format!("{}/{total}", iteration + 1)
}

fn status_str(kind: VerdictKind) -> &'static str {
    match kind {
        VerdictKind::Success => "PASS",
        VerdictKind::Timeout => "TIMEOUT",
        VerdictKind::LaunchFailure => "LAUNCH FAIL",
        VerdictKind::EmptyOutput => "NO OUTPUT",
        VerdictKind::Crash => "CRASH",
        VerdictKind::DiffMismatch => "DIFF",
        VerdictKind::Unimplemented => "MISSING CODE",
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    test_name: Style,
    fail_output: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.test_name = Style::new().blue().bold();
        self.fail_output = Style::new().magenta();
    }
}
