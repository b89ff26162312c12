// Copyright (c) The emutest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating test files and the build directory.
//!
//! A test is either a single source file (`t0.cc`) or a directory (`t1.dir`). Its golden
//! transcript lives next to it with the extension replaced by `.ok`.

use crate::errors::DiscoveryError;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use tracing::debug;

/// Extensions that mark a file or directory as a test.
pub const TEST_EXTENSIONS: &[&str] = &["cc", "dir"];

/// The extension of golden transcript files.
pub const GOLDEN_EXTENSION: &str = "ok";

/// The name of the build descriptor looked up by [`find_build_dir`].
pub const MAKEFILE_NAME: &str = "Makefile";

/// A discovered test: its name and the absolute path to its source.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct TestFile {
    name: String,
    path: Utf8PathBuf,
}

impl TestFile {
    /// Creates a new `TestFile` from a path, if the path has a test extension.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Option<Self> {
        let path = path.into();
        if !is_test_name(path.file_name()?) {
            return None;
        }
        let name = path.file_stem()?.to_owned();
        Some(Self { name, path })
    }

    /// The test name, e.g. `t0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The path to the test source.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

fn is_test_name(file_name: &str) -> bool {
    Utf8Path::new(file_name)
        .extension()
        .is_some_and(|ext| TEST_EXTENSIONS.contains(&ext))
}

/// Finds test files matching `inputs`, resolved relative to `cwd`.
///
/// * A directory (not itself a `.dir` test) contributes every test directly inside it.
/// * A path with an extension is taken as-is if it exists.
/// * A bare name like `tests/t0` is completed by scanning `tests/` for `t0*.cc` and `t0*.dir`.
///
/// Tests with the same name collapse into one. The result is sorted by name.
pub fn find_test_files(
    cwd: &Utf8Path,
    inputs: &[Utf8PathBuf],
) -> Result<Vec<TestFile>, DiscoveryError> {
    let mut unique = BTreeMap::new();
    let mut add = |path: Utf8PathBuf| -> Result<(), DiscoveryError> {
        let path = canonicalize(&path)?;
        if let Some(test) = TestFile::new(path) {
            unique.insert(test.name.clone(), test);
        }
        Ok(())
    };

    for input in inputs {
        let input = Utf8Path::new(input.as_str().trim());
        let path = cwd.join(input);

        if path.is_dir() && !is_test_name(path.file_name().unwrap_or_default()) {
            for entry in read_dir_names(&path)? {
                if is_test_name(&entry) {
                    add(path.join(entry))?;
                }
            }
        } else if input.extension().is_some() {
            if path.exists() {
                add(path)?;
            } else {
                debug!("ignoring nonexistent input `{input}`");
            }
        } else {
            let parent = path.parent().unwrap_or(cwd);
            let prefix = path.file_name().unwrap_or_default();
            for entry in read_dir_names(parent)? {
                if entry.starts_with(prefix) && is_test_name(&entry) {
                    add(parent.join(entry))?;
                }
            }
        }
    }

    if unique.is_empty() {
        return Err(DiscoveryError::NoTestsFound {
            inputs: inputs.to_vec(),
        });
    }
    Ok(unique.into_values().collect())
}

/// Returns the nearest directory at or above `start` that contains a `Makefile`.
pub fn find_build_dir(start: &Utf8Path) -> Result<Utf8PathBuf, DiscoveryError> {
    let start = canonicalize(start)?;
    let start_dir = if start.is_dir() {
        start.as_path()
    } else {
        start.parent().unwrap_or(&start)
    };

    start_dir
        .ancestors()
        .find(|dir| dir.join(MAKEFILE_NAME).is_file())
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| DiscoveryError::MakefileNotFound {
            start: start_dir.to_path_buf(),
        })
}

/// Returns the current directory as a UTF-8 path.
pub fn current_dir() -> Result<Utf8PathBuf, DiscoveryError> {
    let cwd = std::env::current_dir().map_err(DiscoveryError::CurrentDir)?;
    Utf8PathBuf::try_from(cwd).map_err(|err| DiscoveryError::NonUtf8Path(err.into_path_buf()))
}

fn canonicalize(path: &Utf8Path) -> Result<Utf8PathBuf, DiscoveryError> {
    path.canonicalize_utf8()
        .map_err(|error| DiscoveryError::Canonicalize {
            path: path.to_owned(),
            error,
        })
}

fn read_dir_names(dir: &Utf8Path) -> Result<Vec<String>, DiscoveryError> {
    let read_dir_err = |error| DiscoveryError::ReadDir {
        path: dir.to_owned(),
        error,
    };

    let mut names = Vec::new();
    for entry in dir.read_dir_utf8().map_err(read_dir_err)? {
        names.push(entry.map_err(read_dir_err)?.file_name().to_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::{Utf8TempDir, tempdir};
    use pretty_assertions::assert_eq;

    fn fixture() -> Utf8TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("Makefile"), "all:\n").unwrap();
        std::fs::create_dir(root.join("tests")).unwrap();
        for file in ["t0.cc", "t0.ok", "t1.cc", "t10.cc", "notes.txt"] {
            std::fs::write(root.join("tests").join(file), "").unwrap();
        }
        std::fs::create_dir(root.join("tests/t2.dir")).unwrap();
        dir
    }

    fn names(tests: &[TestFile]) -> Vec<&str> {
        tests.iter().map(TestFile::name).collect()
    }

    #[test]
    fn directory_input_collects_tests() {
        let dir = fixture();
        let tests = find_test_files(dir.path(), &["tests".into()]).unwrap();
        assert_eq!(names(&tests), vec!["t0", "t1", "t10", "t2"]);
        assert!(tests.iter().all(|test| test.path().is_absolute()));
    }

    #[test]
    fn bare_name_completes_by_prefix() {
        let dir = fixture();
        let tests = find_test_files(dir.path(), &["tests/t1".into()]).unwrap();
        assert_eq!(names(&tests), vec!["t1", "t10"]);
    }

    #[test]
    fn explicit_files_and_duplicates() {
        let dir = fixture();
        let tests = find_test_files(
            dir.path(),
            &[
                "tests/t2.dir".into(),
                "tests/t0.cc".into(),
                "tests/t0.cc".into(),
                "tests/missing.cc".into(),
            ],
        )
        .unwrap();
        assert_eq!(names(&tests), vec!["t0", "t2"]);
        assert_eq!(
            tests[0].path(),
            dir.path().canonicalize_utf8().unwrap().join("tests/t0.cc").as_path()
        );
    }

    #[test]
    fn no_tests_is_an_error() {
        let dir = fixture();
        let error = find_test_files(dir.path(), &["tests/notes.txt".into()]).unwrap_err();
        assert!(
            matches!(error, DiscoveryError::NoTestsFound { .. }),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn build_dir_walks_up() {
        let dir = fixture();
        let expected = dir.path().canonicalize_utf8().unwrap();
        assert_eq!(find_build_dir(&dir.path().join("tests")).unwrap(), expected);
        assert_eq!(
            find_build_dir(&dir.path().join("tests/t0.cc")).unwrap(),
            expected
        );
    }

    #[test]
    fn build_dir_missing() {
        let dir = tempdir().unwrap();
        let error = find_build_dir(dir.path()).unwrap_err();
        assert!(
            matches!(error, DiscoveryError::MakefileNotFound { .. }),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn test_file_requires_test_extension() {
        assert_eq!(TestFile::new("tests/t0.ok"), None);
        let test = TestFile::new("tests/t3.dir").unwrap();
        assert_eq!(test.name(), "t3");
        assert_eq!(test.path(), "tests/t3.dir");
    }
}
