// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A parallel test harness for emulator-run projects.
//!
//! `emutest` builds each test with `make`, boots it under QEMU, and compares the guest's output
//! against a golden `.ok` file. See [`emutest_runner`] for the core logic.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
