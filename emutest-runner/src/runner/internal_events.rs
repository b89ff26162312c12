// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal events used between the runner components.
//!
//! Executor tasks send [`ExecutorEvent`]s to the dispatcher. The dispatcher also posts
//! [`ControlEvent`]s to itself, and receives signals. All of these are handled one at a time.

use crate::{classify::Verdict, errors::CommandFailure, signal::ShutdownEvent, test_case::TestId};
use std::time::Duration;

/// A message sent by an executor task once its operation completes.
///
/// Each task sends at most one of these. Tasks that are cancelled send nothing.
#[derive(Debug)]
pub(super) enum ExecutorEvent {
    /// `make <name>` succeeded.
    BuildSucceeded { id: TestId },

    /// `make <name>` failed.
    BuildFailed { id: TestId, error: CommandFailure },

    /// A sandbox run completed and was classified.
    RunFinished {
        id: TestId,
        iteration: usize,
        verdict: Verdict,
    },
}

/// A message the dispatcher posts to itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum ControlEvent {
    /// Ask the scheduler to admit waiting tests.
    AdmitMore,
}

#[derive(Debug)]
pub(super) enum InternalEvent {
    Executor(ExecutorEvent),
    Control(ControlEvent),
    Signal(ShutdownEvent),
}

/// An operation the dispatcher asks the executor to launch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Operation {
    /// Build a test.
    Build { id: TestId },

    /// Run an iteration of a built test.
    Run {
        id: TestId,
        iteration: usize,
        timeout: Duration,
    },
}

impl Operation {
    pub(super) fn id(self) -> TestId {
        match self {
            Self::Build { id } | Self::Run { id, .. } => id,
        }
    }
}
