// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Lines of guest output starting with this prefix make up the transcript.
pub const TRANSCRIPT_PREFIX: &str = "***";

/// A guest prints this when it reaches code that has not been written yet.
pub const MISSING_CODE_MARKER: &str = "*** Missing code at";

/// Extracts the filtered transcript from raw sandbox output.
///
/// Terminal escape sequences are stripped from each line, lines that then start with
/// [`TRANSCRIPT_PREFIX`] are kept, and each kept line is terminated with `\n`.
pub fn filter_transcript(raw: &str) -> String {
    let mut out = String::new();
    for line in raw.lines() {
        let line = strip_ansi_escapes::strip_str(line);
        if line.starts_with(TRANSCRIPT_PREFIX) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

/// Returns true if the transcript reports unimplemented code.
pub fn is_unimplemented(transcript: &str) -> bool {
    transcript.contains(MISSING_CODE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn keeps_only_prefixed_lines() {
        let raw = indoc! {"
            SeaBIOS (version 1.16)
            Booting from Hard Disk...
            *** hello
            \x1b[31m*** colored\x1b[0m
              *** indented is dropped
            ***
            done
        "};

        assert_eq!(filter_transcript(raw), "*** hello\n*** colored\n***\n");
    }

    #[test_case("", ""; "empty")]
    #[test_case("*** a\r\n*** b\r\n", "*** a\n*** b\n"; "crlf")]
    #[test_case("*** no trailing newline", "*** no trailing newline\n"; "no trailing newline")]
    fn edge_cases(raw: &str, expected: &str) {
        assert_eq!(filter_transcript(raw), expected);
    }

    #[test]
    fn unimplemented_marker() {
        assert!(is_unimplemented("*** ok\n*** Missing code at kernel.cc:42\n"));
        assert!(!is_unimplemented("*** Missing\n"));
    }

    proptest! {
        #[test]
        fn every_line_is_prefixed_and_terminated(raw in "(\\PC{0,20}\n){0,10}") {
            let out = filter_transcript(&raw);
            prop_assert!(out.is_empty() || out.ends_with('\n'));
            for line in out.lines() {
                prop_assert!(line.starts_with(TRANSCRIPT_PREFIX), "line {line:?}");
            }
        }

        #[test]
        fn filtering_is_idempotent(raw in "((\\*\\*\\*)?[ -~]{0,20}\n){0,10}") {
            let once = filter_transcript(&raw);
            prop_assert_eq!(filter_transcript(&once), once);
        }

        #[test]
        fn prefixed_lines_survive(lines in prop::collection::vec("[a-z ]{0,10}", 0..8)) {
            let raw: String = lines.iter().map(|line| format!("*** {line}\nnoise\n")).collect();
            let expected: String = lines.iter().map(|line| format!("*** {line}\n")).collect();
            prop_assert_eq!(filter_transcript(&raw), expected);
        }
    }
}
