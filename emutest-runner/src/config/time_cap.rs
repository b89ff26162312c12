// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::TimeCapParseError;
use serde::Deserialize;
use std::{fmt, str::FromStr, time::Duration};

/// Type for the time-cap config key.
///
/// Once the recorded iteration time of a test exceeds the cap, no further iterations of that test
/// are started.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TimeCap {
    /// Iterations are never stopped because of elapsed time.
    #[default]
    Unlimited,

    /// Stop iterating once the total recorded time exceeds this duration.
    Limit(Duration),
}

impl TimeCap {
    /// Returns the cap as a duration, or `None` if unlimited.
    pub fn limit(self) -> Option<Duration> {
        match self {
            Self::Unlimited => None,
            Self::Limit(limit) => Some(limit),
        }
    }

    /// Returns true if `elapsed` is past the cap.
    pub fn is_exceeded_by(self, elapsed: Duration) -> bool {
        self.limit().is_some_and(|limit| elapsed > limit)
    }
}

impl FromStr for TimeCap {
    type Err = TimeCapParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "unlimited" {
            return Ok(Self::Unlimited);
        }
        let duration =
            humantime::parse_duration(trimmed).map_err(|err| TimeCapParseError::new(s, err))?;
        // A zero cap is the same as no cap at all.
        if duration.is_zero() {
            Ok(Self::Unlimited)
        } else {
            Ok(Self::Limit(duration))
        }
    }
}

impl fmt::Display for TimeCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Limit(limit) => write!(f, "{}", humantime::format_duration(*limit)),
        }
    }
}

impl<'de> Deserialize<'de> for TimeCap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TimeCap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "a duration (e.g. \"30s\") or the string \"unlimited\""
                )
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("", Some(TimeCap::Unlimited); "empty")]
    #[test_case("unlimited", Some(TimeCap::Unlimited); "unlimited")]
    #[test_case("0s", Some(TimeCap::Unlimited); "zero")]
    #[test_case("1m 30s", Some(TimeCap::Limit(Duration::from_secs(90))); "compound")]
    #[test_case("forever", None; "invalid")]
    fn parse(input: &str, expected: Option<TimeCap>) {
        assert_eq!(input.parse::<TimeCap>().ok(), expected);
    }

    #[test]
    fn exceeded_is_strict() {
        let cap = TimeCap::Limit(Duration::from_secs(2));
        assert!(!cap.is_exceeded_by(Duration::from_secs(2)));
        assert!(cap.is_exceeded_by(Duration::from_millis(2001)));
        assert!(!TimeCap::Unlimited.is_exceeded_by(Duration::MAX));
    }
}
