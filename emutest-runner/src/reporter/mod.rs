// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the progress and results of a test run.
//!
//! The main type here is [`TestReporter`], which is constructed via a [`TestReporterBuilder`].

mod displayer;
pub mod events;

pub use displayer::*;
