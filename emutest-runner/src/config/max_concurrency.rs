// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::get_num_cpus, errors::MaxConcurrencyParseError};
use serde::Deserialize;
use std::{cmp::Ordering, fmt, str::FromStr};

/// Type for the max-concurrency config key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaxConcurrency {
    /// Build and run at most this many tests at once.
    Count(usize),

    /// Build and run as many tests at once as there are logical CPUs.
    NumCpus,
}

impl MaxConcurrency {
    /// Gets the actual concurrency limit computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(count) => count,
            Self::NumCpus => get_num_cpus(),
        }
    }

    fn from_signed(value: i64) -> Option<Self> {
        match value.cmp(&0) {
            Ordering::Greater => Some(Self::Count(value as usize)),
            Ordering::Less => Some(Self::Count(
                (get_num_cpus() as i64 + value).max(1) as usize,
            )),
            Ordering::Equal => None,
        }
    }
}

impl FromStr for MaxConcurrency {
    type Err = MaxConcurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<i64>() {
            Err(e) => Err(MaxConcurrencyParseError::new(format!("{s} ({e})"))),
            Ok(value) => Self::from_signed(value)
                .ok_or_else(|| MaxConcurrencyParseError::new(format!("{s} (may not be 0)"))),
        }
    }
}

impl fmt::Display for MaxConcurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxConcurrency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = MaxConcurrency;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a non-zero integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(MaxConcurrency::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                MaxConcurrency::from_signed(v).ok_or_else(|| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
                })
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    0 => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                    v => Ok(MaxConcurrency::Count(v as usize)),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmutestConfig, test_helpers::write_config};
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use test_case::test_case;

    #[test_case(
        indoc! {r#"
            [profile.custom]
            max-concurrency = -1
        "#},
        Some(get_num_cpus().saturating_sub(1).max(1))

        ; "negative"
    )]
    #[test_case(
        indoc! {r#"
            [profile.custom]
            max-concurrency = 2
        "#},
        Some(2)

        ; "positive"
    )]
    #[test_case(
        indoc! {r#"
            [profile.custom]
            max-concurrency = 0
        "#},
        None

        ; "zero"
    )]
    #[test_case(
        indoc! {r#"
            [profile.custom]
            max-concurrency = "num-cpus"
        "#},
        Some(get_num_cpus())

        ; "num-cpus"
    )]
    fn parse_max_concurrency(config_contents: &str, expected: Option<usize>) {
        let project_dir = tempdir().unwrap();
        write_config(project_dir.path(), config_contents);

        let config = EmutestConfig::from_sources(project_dir.path(), None);
        match expected {
            None => assert!(config.is_err(), "config parse failed"),
            Some(n) => assert_eq!(
                config
                    .unwrap()
                    .profile("custom")
                    .unwrap()
                    .max_concurrency()
                    .compute(),
                n,
            ),
        }
    }

    #[test_case("num-cpus", Ok(MaxConcurrency::NumCpus); "num-cpus")]
    #[test_case("3", Ok(MaxConcurrency::Count(3)); "count")]
    #[test_case("0", Err(()); "zero")]
    #[test_case("many", Err(()); "garbage")]
    fn from_str(input: &str, expected: Result<MaxConcurrency, ()>) {
        assert_eq!(input.parse::<MaxConcurrency>().map_err(|_| ()), expected);
    }
}
