// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser};
use emutest_metadata::EmutestExitCode;
use emutest_runner::{
    config::{EmutestConfig, MaxConcurrency, TimeCap},
    discovery::{current_dir, find_build_dir, find_test_files},
    reporter::TestReporterBuilder,
    runner::{RunStats, SandboxExecutor, TestRunnerBuilder},
    signal::SignalHandlerKind,
};
use std::{io, num::NonZeroUsize, time::Duration};
use tracing::debug;

/// Builds tests with make, runs them under QEMU, and checks their output against golden files.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct App {
    /// Test files, directories of tests, or test name prefixes
    #[arg(value_name = "INPUTS", default_value = "tests")]
    inputs: Vec<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(flatten)]
    runner_opts: TestRunnerOpts,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Config file [default: build-dir/.config/emutest.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Config profile to use
    #[arg(
        long,
        short = 'P',
        env = "EMUTEST_PROFILE",
        default_value = EmutestConfig::DEFAULT_PROFILE,
    )]
    profile: String,
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Runner options")]
struct TestRunnerOpts {
    /// Number of tests to build and run at once [possible values: integer or "num-cpus"]
    #[arg(
        long,
        short = 'j',
        visible_alias = "test-threads",
        value_name = "N",
        allow_negative_numbers = true,
        env = "EMUTEST_MAX_CONCURRENCY"
    )]
    max_concurrency: Option<MaxConcurrency>,

    /// Number of measured iterations per test
    #[arg(long, short = 'n', value_name = "N", env = "EMUTEST_ITERATIONS")]
    iterations: Option<NonZeroUsize>,

    /// Deadline for a single sandbox run, e.g. "10s"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_timeout: Option<Duration>,

    /// Stop iterating a test once its recorded time exceeds this, e.g. "1m" or "unlimited"
    #[arg(long, value_name = "DURATION")]
    time_cap: Option<TimeCap>,

    /// Stop iterating a test after its first failed iteration
    #[arg(long, name = "early-exit", overrides_with = "no-early-exit")]
    early_exit: bool,

    /// Run every iteration of a test even after one fails
    #[arg(long, name = "no-early-exit", overrides_with = "early-exit")]
    no_early_exit: bool,
}

impl TestRunnerOpts {
    fn to_builder(&self) -> TestRunnerBuilder {
        let mut builder = TestRunnerBuilder::default();
        if let Some(max_concurrency) = self.max_concurrency {
            builder.set_max_concurrency(max_concurrency);
        }
        if let Some(iterations) = self.iterations {
            builder.set_iterations(iterations);
        }
        if let Some(run_timeout) = self.run_timeout {
            builder.set_run_timeout(run_timeout);
        }
        if let Some(time_cap) = self.time_cap {
            builder.set_time_cap(time_cap);
        }
        if self.early_exit {
            builder.set_early_exit(true);
        } else if self.no_early_exit {
            builder.set_early_exit(false);
        }
        builder
    }
}

impl App {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let cwd = current_dir().map_err(ExpectedError::discovery)?;
        let tests = find_test_files(&cwd, &self.inputs).map_err(ExpectedError::discovery)?;

        let search_start = self
            .inputs
            .first()
            .map_or_else(|| cwd.clone(), |input| cwd.join(input));
        let build_dir = find_build_dir(nearest_existing(&search_start))
            .map_err(ExpectedError::discovery)?;
        debug!(%build_dir, tests = tests.len(), "discovered tests");

        let config =
            EmutestConfig::from_sources(build_dir.clone(), self.config_opts.config_file.as_deref())?;
        let profile = config.profile(&self.config_opts.profile)?;

        let builder = self.runner_opts.to_builder();
        let executor = SandboxExecutor::new(&config, &profile, build_dir, output.verbose);
        let runner = builder.build(tests, &profile, SignalHandlerKind::Standard, executor)?;

        let mut reporter = TestReporterBuilder::default()
            .set_verbose(output.verbose)
            .set_colorize(output.color.should_colorize(supports_color::Stream::Stdout))
            .build(io::stdout());

        // Report the first write error once the run is over, rather than aborting mid-run.
        let mut write_error = None;
        let run_stats = runner
            .execute(|event| {
                if write_error.is_none() {
                    if let Err(err) = reporter.report_event(&event) {
                        write_error = Some(err);
                    }
                }
            })
            .map_err(ExpectedError::execute)?;

        if let Some(err) = write_error {
            return Err(ExpectedError::WriteOutputError { err });
        }
        final_status(&run_stats)
    }
}

/// Maps a finished run to an exit code.
fn final_status(run_stats: &RunStats) -> Result<i32> {
    if run_stats.cancel_reason.is_some() {
        Err(ExpectedError::Interrupted)
    } else if run_stats.any_failed() {
        Err(ExpectedError::TestRunFailed)
    } else {
        Ok(EmutestExitCode::OK)
    }
}

/// A bare test name like `tests/t0` is not a path on disk, so the Makefile search starts from the
/// nearest ancestor that exists.
fn nearest_existing(path: &Utf8Path) -> &Utf8Path {
    path.ancestors()
        .find(|dir| dir.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use clap::CommandFactory;
    use emutest_runner::reporter::events::CancelReason;
    use test_case::test_case;

    #[test]
    fn verify_app() {
        App::command().debug_assert();
    }

    #[test_case(&["emutest"], None, None, false; "defaults")]
    #[test_case(&["emutest", "-j", "2", "-n", "5"], Some(MaxConcurrency::Count(2)), NonZeroUsize::new(5), false; "short flags")]
    #[test_case(&["emutest", "--max-concurrency", "num-cpus", "--early-exit"], Some(MaxConcurrency::NumCpus), None, true; "num cpus")]
    #[test_case(&["emutest", "--test-threads", "3", "tests/t0"], Some(MaxConcurrency::Count(3)), None, false; "alias")]
    fn parse_runner_opts(
        args: &[&str],
        max_concurrency: Option<MaxConcurrency>,
        iterations: Option<NonZeroUsize>,
        early_exit: bool,
    ) {
        let app = App::try_parse_from(args).expect("arguments parse");
        assert_eq!(app.runner_opts.max_concurrency, max_concurrency);
        assert_eq!(app.runner_opts.iterations, iterations);
        assert_eq!(app.runner_opts.early_exit, early_exit);
    }

    #[test_case(&["emutest"], None; "profile value")]
    #[test_case(&["emutest", "--early-exit"], Some(true); "enabled")]
    #[test_case(&["emutest", "--no-early-exit"], Some(false); "disabled")]
    #[test_case(&["emutest", "--early-exit", "--no-early-exit"], Some(false); "last flag wins")]
    #[test_case(&["emutest", "--no-early-exit", "--early-exit"], Some(true); "last flag wins again")]
    fn early_exit_overrides_profile(args: &[&str], expected: Option<bool>) {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(".config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("emutest.toml"),
            "[profile.default]\nearly-exit = true\n",
        )
        .unwrap();
        let config = EmutestConfig::from_sources(dir.path(), None).unwrap();
        let profile = config.profile(EmutestConfig::DEFAULT_PROFILE).unwrap();

        let app = App::try_parse_from(args).expect("arguments parse");
        let settings = app.runner_opts.to_builder().settings(&profile);
        assert_eq!(settings.policy.early_exit, expected.unwrap_or(true));
    }

    #[test]
    fn durations_parse() {
        let app = App::try_parse_from(["emutest", "--run-timeout", "2s", "--time-cap", "1m"])
            .expect("arguments parse");
        assert_eq!(app.runner_opts.run_timeout, Some(Duration::from_secs(2)));
        assert_eq!(
            app.runner_opts.time_cap,
            Some(TimeCap::Limit(Duration::from_secs(60)))
        );
    }

    #[test_case(&["emutest", "-j", "0"]; "zero concurrency")]
    #[test_case(&["emutest", "-n", "0"]; "zero iterations")]
    #[test_case(&["emutest", "--run-timeout", "soon"]; "bad timeout")]
    fn invalid_args(args: &[&str]) {
        App::try_parse_from(args).expect_err("arguments are rejected");
    }

    #[test]
    fn inputs_default_to_tests_dir() {
        let app = App::try_parse_from(["emutest"]).expect("arguments parse");
        assert_eq!(app.inputs, vec![Utf8PathBuf::from("tests")]);
    }

    #[test]
    fn final_status_codes() {
        let mut stats = RunStats::default();
        assert_eq!(final_status(&stats).expect("success"), EmutestExitCode::OK);

        stats.failed = 1;
        assert_eq!(
            final_status(&stats).unwrap_err().process_exit_code(),
            EmutestExitCode::TEST_RUN_FAILED
        );

        stats.cancel_reason = Some(CancelReason::Interrupt);
        assert_eq!(
            final_status(&stats).unwrap_err().process_exit_code(),
            EmutestExitCode::INTERRUPTED
        );
    }

    #[test]
    fn nearest_existing_ancestor() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("tests").join("t0");
        assert_eq!(nearest_existing(&missing), dir.path());
    }
}
