// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::test_case::{TestCase, TestId, TestState};

/// Selects waiting tests to admit, in ascending id order, without exceeding `max_concurrency`
/// tests running at once.
///
/// This only decides. The caller admits the returned tests.
pub(super) fn select_admissions(tests: &[TestCase], max_concurrency: usize) -> Vec<TestId> {
    let running = tests.iter().filter(|test| test.is_running()).count();
    let available = max_concurrency.saturating_sub(running);

    tests
        .iter()
        .filter(|test| test.state() == TestState::Waiting)
        .take(available)
        .map(TestCase::id)
        .collect()
}
