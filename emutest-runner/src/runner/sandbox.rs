// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The production [`TestExecutor`]: `make` for builds, an emulator for runs.

use super::{BuildResult, TestExecutor};
use crate::{
    classify::{OutputClassifier, SideFiles, Verdict},
    config::{BuildConfig, EmutestConfig, EmutestProfile, SandboxConfig},
    discovery::MAKEFILE_NAME,
    errors::{CommandFailure, DependencyBuildError},
    process::{CancelSignal, Cancelled, ProcessCommand, ProcessOutcome},
    test_case::TestUnit,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{io, time::Duration};
use tracing::{debug, warn};

/// Marker in the Makefile text indicating that tests have a data disk co-target.
const DATA_TARGET_MARKER: &str = ".data";

/// Builds tests with `make` and runs them in an emulator, from a single build directory.
#[derive(Clone, Debug)]
pub struct SandboxExecutor {
    build: BuildConfig,
    sandbox: SandboxConfig,
    classifier: OutputClassifier,
    build_dir: Utf8PathBuf,
    build_timeout: Duration,
    dependency_timeout: Duration,
    builds_data: bool,
    verbose: bool,
}

impl SandboxExecutor {
    /// Creates a new executor for the project whose `Makefile` is in `build_dir`.
    pub fn new(
        config: &EmutestConfig,
        profile: &EmutestProfile<'_>,
        build_dir: impl Into<Utf8PathBuf>,
        verbose: bool,
    ) -> Self {
        let build_dir = build_dir.into();
        let builds_data = makefile_builds_data(&build_dir);
        debug!(%build_dir, builds_data, "sandbox executor");

        Self {
            build: config.build().clone(),
            sandbox: config.sandbox().clone(),
            classifier: OutputClassifier::new(config.diff().clone(), build_dir.clone()),
            build_timeout: profile.build_timeout(),
            dependency_timeout: profile.dependency_timeout(),
            build_dir,
            builds_data,
            verbose,
        }
    }

    fn side_files(&self, test: &TestUnit) -> SideFiles {
        SideFiles::new(self.build_dir.clone(), test.name())
    }

    fn build_command(&self) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(&self.build.program);
        cmd.current_dir(&self.build_dir);
        cmd
    }

    /// The disk image for `name`: a shared kernel image if one was built, otherwise a per-test
    /// image.
    async fn image_path(&self, name: &str) -> Utf8PathBuf {
        let image_dir = self.build_dir.join(&self.build.dependencies_dir).join("build");
        let shared = image_dir.join("kernel.img");
        if is_file(&shared).await {
            shared
        } else {
            image_dir.join(format!("{name}.img"))
        }
    }
}

impl TestExecutor for SandboxExecutor {
    async fn build_dependencies(
        &self,
        cancel: &mut CancelSignal,
    ) -> Result<Result<(), DependencyBuildError>, Cancelled> {
        let mut cmd = self.build_command();
        cmd.arg("-C").arg(self.build.dependencies_dir.as_str());

        let outcome = cmd.run(self.dependency_timeout, cancel).await?;
        Ok(command_result(&cmd, outcome)
            .map_err(|failure| DependencyBuildError::new(self.build_dir.clone(), failure)))
    }

    async fn build_test(
        &self,
        test: &TestUnit,
        cancel: &mut CancelSignal,
    ) -> Result<BuildResult, Cancelled> {
        remove_stale(&self.side_files(test).diff()).await;

        let mut cmd = self.build_command();
        cmd.arg(test.name());
        if self.builds_data {
            cmd.arg(format!("{}{DATA_TARGET_MARKER}", test.name()));
        }

        let outcome = cmd.run(self.build_timeout, cancel).await?;
        Ok(command_result(&cmd, outcome))
    }

    async fn run_test(
        &self,
        test: &TestUnit,
        iteration: usize,
        timeout: Duration,
        cancel: &mut CancelSignal,
    ) -> Result<Verdict, Cancelled> {
        let files = self.side_files(test);
        let data = files.data();
        let has_data = is_file(&data).await;
        let args = sandbox_args(
            &self.sandbox,
            &self.sandbox.cores(),
            &self.image_path(test.name()).await,
            has_data.then_some(data.as_path()),
            self.verbose,
        );

        let mut cmd = ProcessCommand::new(&self.sandbox.program);
        cmd.args(args)
            .current_dir(&self.build_dir)
            .raw_capture(files.raw());

        debug!(test = test.name(), iteration, "starting sandbox");
        let outcome = cmd.run(timeout, cancel).await?;
        self.classifier
            .classify(
                &self.sandbox.program,
                &outcome,
                &files,
                &test.golden_path(),
                cancel,
            )
            .await
    }
}

/// Returns the emulator arguments for one run.
fn sandbox_args(
    sandbox: &SandboxConfig,
    cores: &str,
    image: &Utf8Path,
    data: Option<&Utf8Path>,
    verbose: bool,
) -> Vec<String> {
    let image_drive = format!("file={image},index=0,media=disk,format=raw,file.locking=off");
    let mut args: Vec<String> = [
        "-accel",
        "tcg,thread=multi",
        "-cpu",
        "max",
        "-smp",
        cores,
        "-m",
        sandbox.memory.as_str(),
        "-no-reboot",
        "-nographic",
        "--monitor",
        "none",
        "-drive",
        image_drive.as_str(),
        "-device",
        "isa-debug-exit,iobase=0xf4,iosize=0x04",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();

    if verbose {
        args.extend(["-d".to_owned(), "guest_errors".to_owned()]);
    }
    if let Some(data) = data {
        args.extend([
            "-drive".to_owned(),
            format!("file={data},index=1,media=disk,format=file,locking=off"),
        ]);
    }
    args
}

/// Converts the outcome of a build command into a [`BuildResult`].
fn command_result(cmd: &ProcessCommand, outcome: ProcessOutcome) -> BuildResult {
    match outcome {
        ProcessOutcome::Exited {
            exit_code: Some(0), ..
        } => Ok(()),
        ProcessOutcome::Exited { exit_code, output } => Err(CommandFailure::Exited {
            command: cmd.to_string(),
            exit_code,
            stderr: output.stderr_lossy().into_owned(),
        }),
        ProcessOutcome::StartFailed { error } => Err(CommandFailure::Spawn {
            command: cmd.to_string(),
            error,
        }),
        ProcessOutcome::TimedOut { timeout, .. } => Err(CommandFailure::TimedOut {
            command: cmd.to_string(),
            timeout,
        }),
    }
}

fn makefile_builds_data(build_dir: &Utf8Path) -> bool {
    let path = build_dir.join(MAKEFILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(contents) => contents.contains(DATA_TARGET_MARKER),
        Err(error) => {
            warn!("failed to read `{path}`: {error}");
            false
        }
    }
}

async fn is_file(path: &Utf8Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

async fn remove_stale(path: &Utf8Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!("failed to remove `{path}`: {error}"),
    }
}
