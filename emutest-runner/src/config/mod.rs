// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for emutest.
//!
//! Configuration is layered: the embedded default config is overlaid with the project's
//! `.config/emutest.toml` (or a file passed in explicitly). Settings that vary between runs live
//! in profiles; everything else lives in top-level tables.

mod imp;
mod max_concurrency;
mod time_cap;

pub use imp::*;
pub use max_concurrency::*;
pub use time_cap::*;
