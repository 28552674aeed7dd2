//! Test catalog: finds `*.test.md` files under a suite root.
//!
//! Identifiers are root-relative paths with `/` separators, sorted lexically
//! so suites run in the same order on every platform.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::log::TEST_SUFFIX;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("file {raw:?} is outside root {}", root.display())]
    OutsideRoot { raw: String, root: PathBuf },
    #[error("file {raw:?} must end with {TEST_SUFFIX}")]
    NotATest { raw: String },
    #[error("stat file {raw:?}: {source}")]
    Stat {
        raw: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file {raw:?} is not a regular file")]
    NotRegular { raw: String },
}

/// Walk `root` and return every test file, sorted.
///
/// `.git` directories are pruned and symlinks to directories are not
/// followed.
pub fn discover_tests(root: &Path) -> Result<Vec<String>, DiscoveryError> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && entry.file_name() == ".git"));

    let mut tests = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|source| DiscoveryError::Walk {
            root: root.to_path_buf(),
            source,
        })?;

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() && entry.path().is_dir() {
            continue;
        }

        let is_test = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(TEST_SUFFIX));
        if !is_test {
            continue;
        }

        if let Ok(rel) = entry.path().strip_prefix(root) {
            tests.push(to_slash(rel));
        }
    }

    tests.sort();
    Ok(tests)
}

/// Validate explicit targets against `root_abs` and return them
/// de-duplicated and sorted.
pub fn resolve_explicit_tests(
    root_abs: &Path,
    files: &[String],
) -> Result<Vec<String>, DiscoveryError> {
    let mut unique = BTreeSet::new();

    for raw in files {
        let target = Path::new(raw);
        let joined = if target.is_absolute() {
            target.to_path_buf()
        } else {
            root_abs.join(target)
        };
        let target_abs = clean(&joined);

        let rel = match target_abs.strip_prefix(clean(root_abs)) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                return Err(DiscoveryError::OutsideRoot {
                    raw: raw.clone(),
                    root: root_abs.to_path_buf(),
                });
            }
        };
        if rel.as_os_str().is_empty() {
            return Err(DiscoveryError::NotATest { raw: raw.clone() });
        }

        let is_test = target_abs
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TEST_SUFFIX));
        if !is_test {
            return Err(DiscoveryError::NotATest { raw: raw.clone() });
        }

        let meta = std::fs::metadata(&target_abs).map_err(|source| DiscoveryError::Stat {
            raw: raw.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(DiscoveryError::NotRegular { raw: raw.clone() });
        }

        unique.insert(to_slash(&rel));
    }

    Ok(unique.into_iter().collect())
}

/// Lexically normalise a path: drop `.` components and fold `..` into
/// their parent. Does not touch the filesystem.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
