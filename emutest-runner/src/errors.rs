// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by emutest.

use crate::helpers::{display_exit_code, indent_block};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error, fmt, io, sync::Arc, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse emutest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to emutest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurs while parsing a [`MaxConcurrency`](crate::config::MaxConcurrency) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for max-concurrency: {input}")]
pub struct MaxConcurrencyParseError {
    input: String,
}

impl MaxConcurrencyParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a [`TimeCap`](crate::config::TimeCap) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for time-cap: `{input}` (expected a duration or \"unlimited\")")]
pub struct TimeCapParseError {
    input: String,
    #[source]
    err: humantime::DurationError,
}

impl TimeCapParseError {
    pub(crate) fn new(input: impl Into<String>, err: humantime::DurationError) -> Self {
        Self {
            input: input.into(),
            err,
        }
    }
}

/// An error that occurs while locating test files or the build directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The current directory could not be determined.
    #[error("failed to determine the current directory")]
    CurrentDir(#[source] io::Error),

    /// A path could not be resolved to an absolute path.
    #[error("failed to resolve path `{path}`")]
    Canonicalize {
        /// The path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A path was not valid UTF-8.
    #[error("path `{}` is not valid UTF-8", .0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// A directory could not be read.
    #[error("failed to read directory `{path}`")]
    ReadDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// No test files matched the inputs.
    #[error("no test files found matching {}", display_inputs(.inputs))]
    NoTestsFound {
        /// The inputs that were searched.
        inputs: Vec<Utf8PathBuf>,
    },

    /// No Makefile was found in the directory or any of its parents.
    #[error("no Makefile found in `{start}` or any parent directory")]
    MakefileNotFound {
        /// The directory the search started at.
        start: Utf8PathBuf,
    },
}

fn display_inputs(inputs: &[Utf8PathBuf]) -> String {
    inputs
        .iter()
        .map(|input| format!("`{input}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A failure of an external build or tool command.
#[derive(Clone, Debug, Error)]
pub enum CommandFailure {
    /// The command could not be started.
    #[error("failed to start `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        error: Arc<io::Error>,
    },

    /// The command ran but did not succeed.
    #[error("`{command}` {}{}", display_exit_code(*.exit_code), indent_block(.stderr))]
    Exited {
        /// The command line.
        command: String,

        /// The exit code, or `None` if terminated by a signal.
        exit_code: Option<i32>,

        /// Whatever the command wrote to stderr.
        stderr: String,
    },

    /// The command did not finish within its deadline.
    #[error("`{command}` timed out after {}", humantime::format_duration(*.timeout))]
    TimedOut {
        /// The command line.
        command: String,

        /// The deadline that was exceeded.
        timeout: Duration,
    },
}

/// The shared dependency build failed, so no tests could be run.
#[derive(Clone, Debug, Error)]
#[error("failed to build dependencies in `{dir}`")]
pub struct DependencyBuildError {
    dir: Utf8PathBuf,
    #[source]
    failure: CommandFailure,
}

impl DependencyBuildError {
    pub(crate) fn new(dir: impl Into<Utf8PathBuf>, failure: CommandFailure) -> Self {
        Self {
            dir: dir.into(),
            failure,
        }
    }

    /// Returns the underlying command failure.
    pub fn failure(&self) -> &CommandFailure {
        &self.failure
    }
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error that occurs while building a test runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// An error occurred while setting up signals.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),
}

/// An error that prevented a test run from completing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerExecuteError {
    /// The shared dependency build failed.
    #[error(transparent)]
    DependencyBuild(#[from] DependencyBuildError),
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_none() {
            return Ok(());
        }
        write!(f, "\n  caused by:")?;
        while let Some(err) = source {
            write!(f, "\n  - {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_error_chain_lists_sources() {
        let error = DependencyBuildError::new(
            "/work/kernel",
            CommandFailure::TimedOut {
                command: "make -C kernel".to_owned(),
                timeout: Duration::from_secs(10),
            },
        );

        assert_eq!(
            DisplayErrorChain::new(error).to_string(),
            indoc! {"
                failed to build dependencies in `/work/kernel`
                  caused by:
                  - `make -C kernel` timed out after 10s"
            },
        );
    }

    #[test]
    fn exited_failure_includes_stderr() {
        let failure = CommandFailure::Exited {
            command: "make t0".to_owned(),
            exit_code: Some(2),
            stderr: "t0.cc:3: error: expected ';'\n".to_owned(),
        };

        assert_eq!(
            failure.to_string(),
            "`make t0` exited with exit code 2\n    t0.cc:3: error: expected ';'",
        );
    }

    #[test]
    fn profile_not_found_sorts_profiles() {
        let error = ProfileNotFound::new("ci", ["slow", "default"]);
        assert_eq!(
            error.to_string(),
            "profile `ci` not found (known profiles: default, slow)"
        );
    }
}
