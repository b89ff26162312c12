// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long builds and iterations take.
//!
//! Iterations need to track a start time and a duration. For that we use a combination of a
//! `DateTime<Local>` (realtime clock) and a tokio `Instant` (monotonic clock). The tokio clock is
//! used so that paused-time tests observe the same durations the runner records.

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::Instant;

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two syscalls will happen imperceptibly close to each other, which is good
            // enough for our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stopwatch_follows_tokio_clock() {
        let start = stopwatch();
        tokio::time::advance(Duration::from_millis(1500)).await;
        let end = start.snapshot();

        assert_eq!(end.start_time, start.start_time());
        assert!(
            end.duration >= Duration::from_millis(1500),
            "duration ({:?}) is at least the advanced time",
            end.duration
        );
    }
}
