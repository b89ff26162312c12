// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for emutest-runner.

use std::{fmt, time::Duration};
use swrite::{SWrite, swrite};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "iteration" if `count` is 1, otherwise "iterations".
    pub fn iterations_str(count: usize) -> &'static str {
        if count == 1 {
            "iteration"
        } else {
            "iterations"
        }
    }

    /// Returns "was" if `count` is 1, otherwise "were".
    pub fn were_str(count: usize) -> &'static str {
        if count == 1 { "was" } else { "were" }
    }
}

/// Describes how a command exited.
pub(crate) fn display_exit_code(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with exit code {code}"),
        None => "was terminated by a signal".to_owned(),
    }
}

/// Formats captured output as an indented block on the following lines.
///
/// Returns an empty string if the output is blank.
pub(crate) fn indent_block(output: &str) -> String {
    let output = output.trim_end();
    if output.trim().is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for line in output.lines() {
        swrite!(out, "\n    {line}");
    }
    out
}

#[derive(Debug)]
pub(crate) struct FormattedDuration(pub(crate) Duration);

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = self.0.as_secs_f64();
        if duration > 60.0 {
            write!(f, "{}m {:.2}s", duration as u32 / 60, duration % 60.0)
        } else {
            write!(f, "{duration:.3}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("", ""; "empty")]
    #[test_case("  \n\n", ""; "whitespace only")]
    #[test_case("oops\n", "\n    oops"; "single line")]
    #[test_case("a\nb\n\n", "\n    a\n    b"; "trailing blank lines")]
    fn indent_block_formats(input: &str, expected: &str) {
        assert_eq!(indent_block(input), expected);
    }

    #[test_case(Duration::from_millis(1234), "1.234s"; "seconds")]
    #[test_case(Duration::from_secs(125), "2m 5.00s"; "minutes")]
    fn formatted_duration(duration: Duration, expected: &str) {
        assert_eq!(FormattedDuration(duration).to_string(), expected);
    }
}
