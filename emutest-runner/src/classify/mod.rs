// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning sandbox output into a verdict.
//!
//! Classification happens in three steps:
//!
//! 1. The raw stdout is filtered down to its transcript (see [`filter_transcript`]), which is
//!    persisted as `<name>.out`.
//! 2. [`classify_outcome`] decides everything that doesn't need the golden file. The order of
//!    checks is timeout, launch failure, empty output, unexpected exit code, then stderr.
//! 3. Otherwise the transcript is compared against the golden file with the diff tool.
//!
//! The same output, outcome and golden file always produce the same verdict.

mod transcript;

pub use transcript::*;

use crate::{
    config::DiffConfig,
    helpers::{display_exit_code, indent_block},
    process::{CancelSignal, Cancelled, ProcessCommand, ProcessOutcome},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, io, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// The exit code a guest reports through the debug-exit device on success.
///
/// The device maps a guest write of `v` to exit code `(v << 1) | 1`, so a guest writing 0 exits
/// with 1.
pub const GUEST_SUCCESS_EXIT_CODE: i32 = 1;

/// How long the diff tool may take.
const DIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// The verdict for a single iteration.
#[derive(Clone, Debug)]
pub enum Verdict {
    /// The transcript matched the golden file.
    Success,

    /// The iteration failed.
    Failure(IterationFailure),
}

impl Verdict {
    /// Returns the kind of verdict.
    pub fn kind(&self) -> VerdictKind {
        match self {
            Self::Success => VerdictKind::Success,
            Self::Failure(failure) => failure.kind(),
        }
    }

    /// Returns true if the iteration passed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the failure, if any.
    pub fn failure(&self) -> Option<&IterationFailure> {
        match self {
            Self::Success => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

impl From<IterationFailure> for Verdict {
    fn from(failure: IterationFailure) -> Self {
        Self::Failure(failure)
    }
}

/// The kind of a [`Verdict`], without its details.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum VerdictKind {
    /// The transcript matched.
    Success,

    /// The sandbox was killed at the run deadline.
    Timeout,

    /// The sandbox could not be started.
    LaunchFailure,

    /// The sandbox wrote nothing to stdout.
    EmptyOutput,

    /// The sandbox exited abnormally or wrote to stderr.
    Crash,

    /// The transcript differed from the golden file.
    DiffMismatch,

    /// The guest reported unimplemented code.
    Unimplemented,
}

impl VerdictKind {
    /// Returns a short lowercase description.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "pass",
            Self::Timeout => "timeout",
            Self::LaunchFailure => "launch failure",
            Self::EmptyOutput => "empty output",
            Self::Crash => "crash",
            Self::DiffMismatch => "diff",
            Self::Unimplemented => "missing code",
        }
    }
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an iteration failed.
#[derive(Clone, Debug, Error)]
pub enum IterationFailure {
    /// The sandbox was killed at the run deadline.
    #[error("sandbox timed out after {}", humantime::format_duration(*.timeout))]
    Timeout {
        /// The deadline.
        timeout: Duration,
    },

    /// The sandbox could not be started.
    #[error("failed to start `{program}`")]
    LaunchFailure {
        /// The sandbox program.
        program: String,

        /// The underlying error.
        #[source]
        error: Arc<io::Error>,
    },

    /// The sandbox wrote nothing to stdout.
    #[error("sandbox produced no output{}", indent_block(.stderr))]
    EmptyOutput {
        /// Whatever the sandbox wrote to stderr.
        stderr: String,
    },

    /// The sandbox exited with an unexpected exit code, or wrote to stderr.
    #[error("{}{}", display_crash(*.exit_code), indent_block(.stderr))]
    Crash {
        /// The exit code, or `None` if terminated by a signal.
        exit_code: Option<i32>,

        /// Whatever the sandbox wrote to stderr.
        stderr: String,
    },

    /// The transcript did not match the golden file.
    #[error("transcript differs from `{golden}`")]
    DiffMismatch {
        /// The golden file.
        golden: Utf8PathBuf,

        /// The diff tool's output, or a description of why it could not run.
        diff: String,
    },

    /// The guest reported unimplemented code.
    #[error("guest reported missing code")]
    Unimplemented,
}

impl IterationFailure {
    /// Returns the kind of verdict this failure corresponds to.
    pub fn kind(&self) -> VerdictKind {
        match self {
            Self::Timeout { .. } => VerdictKind::Timeout,
            Self::LaunchFailure { .. } => VerdictKind::LaunchFailure,
            Self::EmptyOutput { .. } => VerdictKind::EmptyOutput,
            Self::Crash { .. } => VerdictKind::Crash,
            Self::DiffMismatch { .. } => VerdictKind::DiffMismatch,
            Self::Unimplemented => VerdictKind::Unimplemented,
        }
    }
}

fn display_crash(exit_code: Option<i32>) -> String {
    if is_conventional_exit(exit_code) {
        "sandbox wrote to stderr".to_owned()
    } else {
        format!("sandbox {}", display_exit_code(exit_code))
    }
}

fn is_conventional_exit(exit_code: Option<i32>) -> bool {
    matches!(exit_code, Some(0 | GUEST_SUCCESS_EXIT_CODE))
}

/// Classifies everything that can be decided without the golden file.
///
/// Returns `None` if the transcript needs to be compared.
pub fn classify_outcome(program: &str, outcome: &ProcessOutcome) -> Option<IterationFailure> {
    match outcome {
        ProcessOutcome::TimedOut { timeout, .. } => Some(IterationFailure::Timeout {
            timeout: *timeout,
        }),
        ProcessOutcome::StartFailed { error } => Some(IterationFailure::LaunchFailure {
            program: program.to_owned(),
            error: error.clone(),
        }),
        ProcessOutcome::Exited { exit_code, output } => {
            let stderr = output.stderr_lossy().into_owned();
            if output.stdout.is_empty() {
                Some(IterationFailure::EmptyOutput { stderr })
            } else if !is_conventional_exit(*exit_code) || !output.stderr.is_empty() {
                Some(IterationFailure::Crash {
                    exit_code: *exit_code,
                    stderr,
                })
            } else {
                None
            }
        }
    }
}

/// The per-test files written next to the Makefile.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SideFiles {
    dir: Utf8PathBuf,
    name: String,
}

impl SideFiles {
    /// Creates the side file set for `name` in `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// The raw capture of sandbox stdout: `<name>.raw`.
    pub fn raw(&self) -> Utf8PathBuf {
        self.with_extension("raw")
    }

    /// The filtered transcript: `<name>.out`.
    pub fn out(&self) -> Utf8PathBuf {
        self.with_extension("out")
    }

    /// The diff against the golden file: `<name>.diff`.
    pub fn diff(&self) -> Utf8PathBuf {
        self.with_extension("diff")
    }

    /// The optional data disk: `<name>.data`.
    pub fn data(&self) -> Utf8PathBuf {
        self.with_extension("data")
    }

    fn with_extension(&self, ext: &str) -> Utf8PathBuf {
        self.dir.join(format!("{}.{ext}", self.name))
    }
}

/// Classifies sandbox runs, persisting the transcript and diff as side files.
#[derive(Clone, Debug)]
pub struct OutputClassifier {
    diff: DiffConfig,
    cwd: Utf8PathBuf,
}

impl OutputClassifier {
    /// Creates a new classifier that runs the diff tool in `cwd`.
    pub fn new(diff: DiffConfig, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            diff,
            cwd: cwd.into(),
        }
    }

    /// Classifies one sandbox run.
    ///
    /// Returns `Err(Cancelled)` only if cancellation fires while the diff tool is running.
    pub async fn classify(
        &self,
        program: &str,
        outcome: &ProcessOutcome,
        files: &SideFiles,
        golden: &Utf8Path,
        cancel: &mut CancelSignal,
    ) -> Result<Verdict, Cancelled> {
        let Some(output) = outcome.output() else {
            return Ok(classify_outcome(program, outcome).map_or(Verdict::Success, Verdict::from));
        };

        let transcript = filter_transcript(&output.stdout_lossy());
        write_side_file(&files.out(), &transcript).await;

        if let Some(failure) = classify_outcome(program, outcome) {
            return Ok(failure.into());
        }

        self.compare(&transcript, files, golden, cancel).await
    }

    async fn compare(
        &self,
        transcript: &str,
        files: &SideFiles,
        golden: &Utf8Path,
        cancel: &mut CancelSignal,
    ) -> Result<Verdict, Cancelled> {
        let mut cmd = ProcessCommand::new(&self.diff.program);
        cmd.args(&self.diff.args)
            .arg("-")
            .arg(golden.as_str())
            .current_dir(&self.cwd)
            .stdin(transcript.to_owned());

        let diff = match cmd.run(DIFF_TIMEOUT, cancel).await? {
            outcome if outcome.is_success() => return Ok(Verdict::Success),
            ProcessOutcome::Exited { output, .. } => {
                let mut diff = output.stdout_lossy().into_owned();
                diff.push_str(&output.stderr_lossy());
                diff
            }
            ProcessOutcome::StartFailed { error } => {
                format!("failed to start `{cmd}`: {error}\n")
            }
            ProcessOutcome::TimedOut { timeout, .. } => {
                format!(
                    "`{cmd}` timed out after {}\n",
                    humantime::format_duration(timeout)
                )
            }
        };

        if is_unimplemented(transcript) {
            return Ok(IterationFailure::Unimplemented.into());
        }

        debug!(golden = %golden, "transcript mismatch");
        write_side_file(&files.diff(), &diff).await;
        Ok(IterationFailure::DiffMismatch {
            golden: golden.to_owned(),
            diff,
        }
        .into())
    }
}

async fn write_side_file(path: &Utf8Path, contents: &str) {
    if let Err(error) = tokio::fs::write(path, contents).await {
        warn!("failed to write `{path}`: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CapturedOutput;
    use bytes::Bytes;
    use test_case::test_case;

    fn exited(exit_code: Option<i32>, stdout: &'static str, stderr: &'static str) -> ProcessOutcome {
        ProcessOutcome::Exited {
            exit_code,
            output: CapturedOutput {
                stdout: Bytes::from_static(stdout.as_bytes()),
                stderr: Bytes::from_static(stderr.as_bytes()),
            },
        }
    }

    #[test_case(exited(Some(1), "*** ok\n", ""), None; "guest success")]
    #[test_case(exited(Some(0), "*** ok\n", ""), None; "clean exit")]
    #[test_case(exited(Some(1), "", "boom"), Some(VerdictKind::EmptyOutput); "empty beats stderr")]
    #[test_case(exited(Some(3), "", ""), Some(VerdictKind::EmptyOutput); "empty beats exit code")]
    #[test_case(exited(Some(3), "*** ok\n", ""), Some(VerdictKind::Crash); "unexpected exit code")]
    #[test_case(exited(None, "*** ok\n", ""), Some(VerdictKind::Crash); "killed by signal")]
    #[test_case(exited(Some(1), "*** ok\n", "warning\n"), Some(VerdictKind::Crash); "stderr present")]
    #[test_case(exited(Some(1), "*** ok\n", "\n"), Some(VerdictKind::Crash); "whitespace-only stderr")]
    #[test_case(
        ProcessOutcome::TimedOut {
            timeout: Duration::from_secs(5),
            output: CapturedOutput::default(),
        },
        Some(VerdictKind::Timeout)
        ; "timeout beats empty output"
    )]
    #[test_case(
        ProcessOutcome::StartFailed {
            error: Arc::new(io::Error::from(io::ErrorKind::NotFound)),
        },
        Some(VerdictKind::LaunchFailure)
        ; "launch failure"
    )]
    fn outcome_precedence(outcome: ProcessOutcome, expected: Option<VerdictKind>) {
        let actual = classify_outcome("qemu-system-x86_64", &outcome);
        assert_eq!(actual.as_ref().map(IterationFailure::kind), expected);

        // Classification is a pure function of the outcome.
        let again = classify_outcome("qemu-system-x86_64", &outcome);
        assert_eq!(again.map(|failure| failure.kind()), expected);
    }

    #[test]
    fn crash_messages() {
        let failure = classify_outcome("qemu", &exited(Some(3), "*** ok\n", "")).unwrap();
        assert_eq!(failure.to_string(), "sandbox exited with exit code 3");

        let failure = classify_outcome("qemu", &exited(Some(1), "*** ok\n", "oops\n")).unwrap();
        assert_eq!(failure.to_string(), "sandbox wrote to stderr\n    oops");
    }

    #[test]
    fn side_file_names() {
        let files = SideFiles::new("/work", "t0");
        assert_eq!(files.raw(), "/work/t0.raw");
        assert_eq!(files.out(), "/work/t0.out");
        assert_eq!(files.diff(), "/work/t0.diff");
        assert_eq!(files.data(), "/work/t0.data");
    }
}
