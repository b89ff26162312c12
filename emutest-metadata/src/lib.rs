// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Shared definitions for [emutest](https://crates.io/crates/emutest).
//!
//! Currently this crate only documents the exit codes produced by the `emutest` binary. Scripts
//! that wrap emutest can depend on this crate instead of hardcoding the values.

mod exit_codes;

pub use exit_codes::*;
