// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that run real child processes: shell scripts standing in for the build tool
//! and the emulator, and the system `diff`.

#![cfg(unix)]

mod basic;
mod fixtures;
