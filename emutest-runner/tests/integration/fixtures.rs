// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use camino_tempfile::{Utf8TempDir, tempdir};
use color_eyre::eyre::Result;
use emutest_runner::{
    config::EmutestConfig,
    discovery::{TestFile, find_test_files},
    reporter::events::{TestEvent, TestEventKind},
    runner::{RunStats, SandboxExecutor, TestRunnerBuilder},
    signal::SignalHandlerKind,
    test_case::TestCase,
};
use std::{collections::BTreeMap, os::unix::fs::PermissionsExt, sync::Once};

/// Stands in for `make`: `-C <dir>` builds dependencies, anything else builds a test image.
const FAKE_MAKE: &str = r#"#!/bin/sh
set -e
if [ "$1" = "-C" ]; then
    mkdir -p "$2/build"
    exit 0
fi
case "$1" in
    *broken*)
        echo "$1.cc:1: error: expected ';'" >&2
        exit 2
        ;;
esac
: > "kernel/build/$1.img"
"#;

/// Stands in for the emulator: behaves according to the name of the image it boots.
const FAKE_SANDBOX: &str = r#"#!/bin/sh
for arg in "$@"; do
    case "$arg" in
        file=*)
            image="${arg#file=}"
            image="${image%%,*}"
            break
            ;;
    esac
done
name=$(basename "$image" .img)
case "$name" in
    pass*)
        printf 'SeaBIOS\n\033[32m*** hello\033[0m\n*** done\n'
        exit 1
        ;;
    mismatch*)
        printf '*** hello\n*** goodbye\n'
        exit 1
        ;;
    unimplemented*)
        printf '*** hello\n*** Missing code at kernel.cc:42\n'
        exit 1
        ;;
    silent*)
        echo "qemu: could not open disk image" >&2
        exit 1
        ;;
    crash*)
        printf '*** hello\n*** done\n'
        exit 3
        ;;
    hang*)
        printf '*** hello\n'
        exec sleep 30
        ;;
esac
exit 1
"#;

pub(crate) const GOLDEN: &str = "*** hello\n*** done\n";

static INIT: Once = Once::new();

pub(crate) fn test_init() {
    INIT.call_once(|| {
        let _ = color_eyre::install();
    });
}

/// A project directory with a Makefile, fake tools and the given tests.
pub(crate) struct Project {
    dir: Utf8TempDir,
}

impl Project {
    /// Creates a project. Each test gets a source file and the same golden file.
    pub(crate) fn new(test_names: &[&str]) -> Result<Self> {
        let dir = tempdir()?;
        let root = dir.path();

        std::fs::write(root.join("Makefile"), "%.img: %.cc\n")?;
        std::fs::create_dir_all(root.join("kernel"))?;
        std::fs::create_dir_all(root.join("tests"))?;
        std::fs::create_dir_all(root.join(".config"))?;

        write_script(&root.join("fake-make"), FAKE_MAKE)?;
        write_script(&root.join("fake-sandbox"), FAKE_SANDBOX)?;

        for name in test_names {
            std::fs::write(root.join("tests").join(format!("{name}.cc")), "")?;
            std::fs::write(root.join("tests").join(format!("{name}.ok")), GOLDEN)?;
        }

        std::fs::write(
            root.join(EmutestConfig::CONFIG_PATH),
            format!(
                r#"
                [build]
                program = "{root}/fake-make"

                [sandbox]
                program = "{root}/fake-sandbox"

                [diff]
                program = "diff"
                args = ["-wBb"]

                [profile.default]
                run-timeout = "500ms"
                "#
            ),
        )?;

        Ok(Self { dir })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    pub(crate) fn tests(&self) -> Result<Vec<TestFile>> {
        Ok(find_test_files(self.root(), &["tests".into()])?)
    }

    /// Runs every test in the project, returning the stats and the final state of each test.
    pub(crate) fn run(&self, builder: TestRunnerBuilder) -> Result<RunOutcome> {
        let config = EmutestConfig::from_sources(self.root(), None)?;
        let profile = config.profile(EmutestConfig::DEFAULT_PROFILE)?;
        let executor = SandboxExecutor::new(&config, &profile, self.root(), false);

        let runner = builder.build(
            self.tests()?,
            &profile,
            SignalHandlerKind::Noop,
            executor,
        )?;

        let mut events = Vec::new();
        let run_stats = runner.execute(|event| events.push(event))?;
        Ok(RunOutcome::new(run_stats, events))
    }
}

fn write_script(path: &Utf8Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub(crate) run_stats: RunStats,
    pub(crate) events: Vec<TestEvent>,
    pub(crate) resolved: BTreeMap<String, TestCase>,
}

impl RunOutcome {
    fn new(run_stats: RunStats, events: Vec<TestEvent>) -> Self {
        let resolved = events
            .iter()
            .filter_map(|event| match &event.kind {
                TestEventKind::TestFinished { test, .. }
                | TestEventKind::TestCompileFailed { test, .. } => {
                    Some((test.name().to_owned(), test.clone()))
                }
                _ => None,
            })
            .collect();
        Self {
            run_stats,
            events,
            resolved,
        }
    }

    pub(crate) fn test(&self, name: &str) -> &TestCase {
        self.resolved
            .get(name)
            .unwrap_or_else(|| panic!("test {name} was not resolved"))
    }
}
