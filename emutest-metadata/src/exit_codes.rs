// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `emutest` failures.
///
/// `emutest` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum EmutestExitCode {}

impl EmutestExitCode {
    /// No errors occurred and emutest exited normally.
    pub const OK: i32 = 0;

    /// No tests were found to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up an emutest invocation: for example, an invalid
    /// config file or a missing `Makefile`.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed to compile or failed at least one iteration.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Building shared dependencies (`make -C kernel`) produced an error.
    pub const BUILD_FAILED: i32 = 101;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// The run was interrupted by the user (Ctrl-C or a termination signal).
    pub const INTERRUPTED: i32 = 130;
}
