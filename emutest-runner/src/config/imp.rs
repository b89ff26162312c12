// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{MaxConcurrency, TimeCap};
use crate::errors::{ConfigParseError, ProfileNotFound};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::{collections::BTreeMap, num::NonZeroUsize, sync::LazyLock, time::Duration};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for emutest.
///
/// Limits that vary between runs are managed through [profiles](EmutestProfile), obtained through
/// the [`profile`](Self::profile) method.
#[derive(Clone, Debug)]
pub struct EmutestConfig {
    project_root: Utf8PathBuf,
    inner: EmutestConfigImpl,
}

impl EmutestConfig {
    /// The default location of the config within the project: `.config/emutest.toml`.
    pub const CONFIG_PATH: &'static str = ".config/emutest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the emutest config from the given file, or if not specified from
    /// `.config/emutest.toml` in the project root.
    ///
    /// Unknown keys are reported as warnings.
    pub fn from_sources(
        project_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let project_root = project_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = project_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let config = Self::make_default_config()
            .add_source(source)
            .build()
            .map_err(|err| ConfigParseError::new(&config_file, err))?;

        let mut unknown = Vec::new();
        let deserialized: EmutestConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.push(path.to_string());
            })
            .map_err(|err| ConfigParseError::new(&config_file, err))?;
        if !unknown.is_empty() {
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                unknown.join(", ")
            );
        }

        Ok(Self {
            project_root,
            inner: deserialized.into_config_impl(),
        })
    }

    /// Returns the default emutest config.
    pub fn default_config(project_root: impl Into<Utf8PathBuf>) -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        let deserialized: EmutestConfigDeserialize = config
            .try_deserialize()
            .expect("default config is always valid");

        Self {
            project_root: project_root.into(),
            inner: deserialized.into_config_impl(),
        }
    }

    /// Returns the project root the config was read relative to.
    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    /// Returns the build tool configuration.
    pub fn build(&self) -> &BuildConfig {
        &self.inner.build
    }

    /// Returns the sandbox configuration.
    pub fn sandbox(&self) -> &SandboxConfig {
        &self.inner.sandbox
    }

    /// Returns the diff tool configuration.
    pub fn diff(&self) -> &DiffConfig {
        &self.inner.diff
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<EmutestProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = if name == Self::DEFAULT_PROFILE {
            None
        } else {
            match self.inner.other_profiles.get(name) {
                Some(profile) => Some(profile),
                None => {
                    return Err(ProfileNotFound::new(
                        name,
                        self.profile_names().map(str::to_owned),
                    ));
                }
            }
        };

        Ok(EmutestProfile {
            name: name.to_owned(),
            default_profile: &self.inner.default_profile,
            custom_profile,
        })
    }

    /// Returns the names of all known profiles, starting with the default profile.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(Self::DEFAULT_PROFILE)
            .chain(self.inner.other_profiles.keys().map(String::as_str))
    }

    fn make_default_config() -> config::ConfigBuilder<config::builder::DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }
}

/// A configuration profile: the limits that apply to one test run.
///
/// Keys not set in a named profile fall back to `[profile.default]`.
#[derive(Clone, Debug)]
pub struct EmutestProfile<'cfg> {
    name: String,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

impl EmutestProfile<'_> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the maximum number of tests building or running at once.
    pub fn max_concurrency(&self) -> MaxConcurrency {
        self.custom_profile
            .and_then(|profile| profile.max_concurrency)
            .unwrap_or(self.default_profile.max_concurrency)
    }

    /// Returns the number of measured iterations per test.
    pub fn iterations(&self) -> NonZeroUsize {
        self.custom_profile
            .and_then(|profile| profile.iterations)
            .unwrap_or(self.default_profile.iterations)
    }

    /// Returns the deadline for a single sandbox run.
    pub fn run_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.run_timeout)
            .unwrap_or(self.default_profile.run_timeout)
    }

    /// Returns the per-test cap on recorded iteration time.
    pub fn time_cap(&self) -> TimeCap {
        self.custom_profile
            .and_then(|profile| profile.time_cap)
            .unwrap_or(self.default_profile.time_cap)
    }

    /// Returns true if a test stops iterating after its first failed iteration.
    pub fn early_exit(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.early_exit)
            .unwrap_or(self.default_profile.early_exit)
    }

    /// Returns the deadline for building a single test.
    pub fn build_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.build_timeout)
            .unwrap_or(self.default_profile.build_timeout)
    }

    /// Returns the deadline for the one-time dependency build.
    pub fn dependency_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.dependency_timeout)
            .unwrap_or(self.default_profile.dependency_timeout)
    }
}

/// The `[build]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildConfig {
    /// The build tool.
    pub program: String,

    /// The dependencies directory, relative to the build directory.
    pub dependencies_dir: Utf8PathBuf,
}

/// The `[sandbox]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SandboxConfig {
    /// The emulator program.
    pub program: String,

    /// The memory size passed to the emulator.
    pub memory: String,

    /// The number of virtual CPUs used unless overridden by `cores_env`.
    pub default_cores: NonZeroUsize,

    /// The environment variable that overrides the number of virtual CPUs.
    pub cores_env: String,
}

impl SandboxConfig {
    /// Returns the number of virtual CPUs for the sandbox, as passed to `-smp`.
    ///
    /// A value in the environment is used verbatim if set and non-empty.
    pub fn cores(&self) -> String {
        match std::env::var(&self.cores_env) {
            Ok(value) if !value.trim().is_empty() => value.trim().to_owned(),
            _ => self.default_cores.to_string(),
        }
    }
}

/// The `[diff]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiffConfig {
    /// The diff program.
    pub program: String,

    /// Arguments passed before `- <golden-file>`.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug)]
struct EmutestConfigImpl {
    build: BuildConfig,
    sandbox: SandboxConfig,
    diff: DiffConfig,
    default_profile: DefaultProfileImpl,
    other_profiles: BTreeMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EmutestConfigDeserialize {
    build: BuildConfig,
    sandbox: SandboxConfig,
    diff: DiffConfig,
    #[serde(rename = "profile")]
    profiles: BTreeMap<String, CustomProfileImpl>,
}

impl EmutestConfigDeserialize {
    fn into_config_impl(mut self) -> EmutestConfigImpl {
        let default_profile = self
            .profiles
            .remove(EmutestConfig::DEFAULT_PROFILE)
            .unwrap_or_default();

        EmutestConfigImpl {
            build: self.build,
            sandbox: self.sandbox,
            diff: self.diff,
            default_profile: DefaultProfileImpl::new(default_profile),
            other_profiles: self.profiles,
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    max_concurrency: MaxConcurrency,
    iterations: NonZeroUsize,
    run_timeout: Duration,
    time_cap: TimeCap,
    early_exit: bool,
    build_timeout: Duration,
    dependency_timeout: Duration,
}

impl DefaultProfileImpl {
    // The embedded default config sets every key, and layered sources can override keys but not
    // remove them.
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            max_concurrency: p
                .max_concurrency
                .expect("max-concurrency present in default profile"),
            iterations: p.iterations.expect("iterations present in default profile"),
            run_timeout: p
                .run_timeout
                .expect("run-timeout present in default profile"),
            time_cap: p.time_cap.expect("time-cap present in default profile"),
            early_exit: p.early_exit.expect("early-exit present in default profile"),
            build_timeout: p
                .build_timeout
                .expect("build-timeout present in default profile"),
            dependency_timeout: p
                .dependency_timeout
                .expect("dependency-timeout present in default profile"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    max_concurrency: Option<MaxConcurrency>,
    #[serde(default)]
    iterations: Option<NonZeroUsize>,
    #[serde(default, with = "humantime_serde::option")]
    run_timeout: Option<Duration>,
    #[serde(default)]
    time_cap: Option<TimeCap>,
    #[serde(default)]
    early_exit: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    build_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    dependency_timeout: Option<Duration>,
}
