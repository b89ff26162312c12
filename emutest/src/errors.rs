// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use emutest_metadata::EmutestExitCode;
use emutest_runner::errors::*;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are short placeholders. The expected way to print one of these errors is
// `display_to_stderr`, which includes the full chain of causes.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDir {
        #[source]
        err: DiscoveryError,
    },
    #[error("no tests to run")]
    NoTestsRun {
        #[source]
        err: DiscoveryError,
    },
    #[error("test discovery error")]
    DiscoveryError {
        #[source]
        err: DiscoveryError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("test runner build error")]
    TestRunnerBuildError {
        #[from]
        err: TestRunnerBuildError,
    },
    #[error("dependency build failed")]
    DependencyBuildFailed {
        #[source]
        err: DependencyBuildError,
    },
    #[error("test run error")]
    TestRunnerExecuteError {
        #[source]
        err: TestRunnerExecuteError,
    },
    #[error("error writing test output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("test run failed")]
    TestRunFailed,
    #[error("test run interrupted")]
    Interrupted,
}

impl ExpectedError {
    pub(crate) fn discovery(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NoTestsFound { .. } => Self::NoTestsRun { err },
            DiscoveryError::CurrentDir(_) => Self::CurrentDir { err },
            err => Self::DiscoveryError { err },
        }
    }

    pub(crate) fn execute(err: TestRunnerExecuteError) -> Self {
        match err {
            TestRunnerExecuteError::DependencyBuild(err) => Self::DependencyBuildFailed { err },
            err => Self::TestRunnerExecuteError { err },
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDir { .. }
            | Self::DiscoveryError { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::TestRunnerBuildError { .. }
            | Self::TestRunnerExecuteError { .. } => EmutestExitCode::SETUP_ERROR,
            Self::NoTestsRun { .. } => EmutestExitCode::NO_TESTS_RUN,
            Self::DependencyBuildFailed { .. } => EmutestExitCode::BUILD_FAILED,
            Self::WriteOutputError { .. } => EmutestExitCode::WRITE_OUTPUT_ERROR,
            Self::TestRunFailed => EmutestExitCode::TEST_RUN_FAILED,
            Self::Interrupted => EmutestExitCode::INTERRUPTED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::CurrentDir { err } => {
                error!("could not determine the current directory");
                err.source()
            }
            Self::NoTestsRun { err } => {
                error!("{err}");
                None
            }
            Self::DiscoveryError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ConfigParseError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::TestRunnerBuildError { err } => {
                error!("failed to build test runner");
                Some(err as &dyn Error)
            }
            Self::DependencyBuildFailed { err } => {
                error!("{err}");
                err.source()
            }
            Self::TestRunnerExecuteError { err } => {
                error!("test run did not complete");
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("error writing test output");
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::Interrupted => {
                error!("test run interrupted");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(
        ExpectedError::discovery(DiscoveryError::NoTestsFound { inputs: vec!["tests".into()] }),
        EmutestExitCode::NO_TESTS_RUN;
        "no tests"
    )]
    #[test_case(
        ExpectedError::discovery(DiscoveryError::MakefileNotFound { start: "/src".into() }),
        EmutestExitCode::SETUP_ERROR;
        "missing makefile"
    )]
    #[test_case(
        ExpectedError::discovery(DiscoveryError::CurrentDir(std::io::ErrorKind::NotFound.into())),
        EmutestExitCode::SETUP_ERROR;
        "current dir"
    )]
    #[test_case(ExpectedError::TestRunFailed, EmutestExitCode::TEST_RUN_FAILED; "test run failed")]
    #[test_case(ExpectedError::Interrupted, EmutestExitCode::INTERRUPTED; "interrupted")]
    fn exit_codes(error: ExpectedError, expected: i32) {
        assert_eq!(error.process_exit_code(), expected);
    }
}
