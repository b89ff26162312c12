// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. It drives tests through a
//! [`TestExecutor`], of which [`SandboxExecutor`] is the production implementation.

mod dispatcher;
mod executor;
mod imp;
mod internal_events;
mod sandbox;
mod scheduler;

pub use executor::{BuildResult, TestExecutor};
pub use imp::*;
pub use sandbox::SandboxExecutor;
