// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [emutest](https://crates.io/crates/emutest).
//!
//! emutest builds each test of a kernel-style project with `make`, boots the resulting image in
//! QEMU, and compares the `***`-prefixed lines the guest prints against a golden `.ok` file. Tests
//! are run in parallel under a concurrency limit and may be repeated for several measured
//! iterations.
//!
//! The flow of a run is:
//!
//! 1. [`discovery`] finds test files and the directory containing the `Makefile`.
//! 2. [`config`] resolves a profile into concrete limits.
//! 3. [`runner::TestRunner`] builds shared dependencies once, then drives every
//!    [`test_case::TestCase`] through its lifecycle, reporting [`reporter::events::TestEvent`]s
//!    to a callback.

pub mod classify;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod helpers;
pub mod process;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod test_case;
mod time;
