//! Result location allocation for test runs.
//!
//! Each execution of `foo.test.md` writes its log into a sibling directory
//! `foo.logs/`, one file per execution named after the UTC second it started:
//! `foo.logs/2026-02-10T14-30-00Z.log.md`. Same-second reruns get `-1`, `-2`, ...
//! suffixes.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Suffix every test file must carry.
pub const TEST_SUFFIX: &str = ".test.md";

const LOG_DIR_SUFFIX: &str = ".logs";
const LOG_FILE_SUFFIX: &str = ".log.md";
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Where a single test execution writes its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLocation {
    /// `<parent>/<stem>.logs`. Not created by the allocator.
    pub dir: PathBuf,
    /// Non-colliding log file inside `dir`.
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("test path {} does not end with {TEST_SUFFIX}", .0.display())]
    NotATest(PathBuf),
    #[error("failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Allocate the next free log path for `test_abs` at time `at`.
pub fn allocate(test_abs: &Path, at: DateTime<Utc>) -> Result<ResultLocation, LocationError> {
    let stem = test_abs
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(TEST_SUFFIX))
        .ok_or_else(|| LocationError::NotATest(test_abs.to_path_buf()))?;

    let parent = test_abs.parent().unwrap_or_else(|| Path::new(""));
    let dir = parent.join(format!("{stem}{LOG_DIR_SUFFIX}"));
    let stamp = at.format(STAMP_FORMAT).to_string();

    let mut path = dir.join(format!("{stamp}{LOG_FILE_SUFFIX}"));
    let mut suffix: u64 = 0;
    while !is_available(&path)? {
        suffix += 1;
        path = dir.join(format!("{stamp}-{suffix}{LOG_FILE_SUFFIX}"));
    }

    Ok(ResultLocation { dir, path })
}

fn is_available(path: &Path) -> Result<bool, LocationError> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(source) => Err(LocationError::Inspect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 10, 14, 30, 0).unwrap()
    }

    #[test]
    fn allocates_sibling_log_dir_and_stamped_file() {
        let tmp = tempfile::tempdir().unwrap();
        let test = tmp.path().join("specs").join("login.test.md");

        let loc = allocate(&test, at()).unwrap();
        assert_eq!(loc.dir, tmp.path().join("specs").join("login.logs"));
        assert_eq!(loc.path, loc.dir.join("2026-02-10T14-30-00Z.log.md"));
        assert!(!loc.dir.exists(), "allocator must not create the directory");
    }

    #[test]
    fn same_second_without_collision_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let test = tmp.path().join("a.test.md");

        let first = allocate(&test, at()).unwrap();
        let second = allocate(&test, at()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn collision_appends_numeric_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let test = tmp.path().join("a.test.md");
        let dir = tmp.path().join("a.logs");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("2026-02-10T14-30-00Z.log.md"), "").unwrap();

        let loc = allocate(&test, at()).unwrap();
        assert_eq!(loc.path, dir.join("2026-02-10T14-30-00Z-1.log.md"));

        std::fs::write(&loc.path, "").unwrap();
        let next = allocate(&test, at()).unwrap();
        assert_eq!(next.path, dir.join("2026-02-10T14-30-00Z-2.log.md"));
    }

    #[test]
    fn rejects_non_test_file() {
        let err = allocate(Path::new("/tmp/readme.md"), at()).unwrap_err();
        assert!(matches!(err, LocationError::NotATest(_)));
        assert!(err.to_string().contains(".test.md"));
    }

    #[test]
    fn timestamp_is_rendered_in_utc() {
        let tmp = tempfile::tempdir().unwrap();
        let test = tmp.path().join("a.test.md");
        let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2026, 2, 10, 16, 30, 0).unwrap();

        let loc = allocate(&test, local.with_timezone(&Utc)).unwrap();
        assert!(loc.path.ends_with("a.logs/2026-02-10T14-30-00Z.log.md"));
    }

    proptest! {
        #[test]
        fn suffix_follows_number_of_existing_logs(existing in 0usize..6) {
            let tmp = tempfile::tempdir().unwrap();
            let test = tmp.path().join("p.test.md");
            let dir = tmp.path().join("p.logs");
            std::fs::create_dir_all(&dir).unwrap();

            for _ in 0..existing {
                let loc = allocate(&test, at()).unwrap();
                std::fs::write(&loc.path, "").unwrap();
            }

            let loc = allocate(&test, at()).unwrap();
            let expected = if existing == 0 {
                "2026-02-10T14-30-00Z.log.md".to_string()
            } else {
                format!("2026-02-10T14-30-00Z-{existing}.log.md")
            };
            prop_assert_eq!(loc.path, dir.join(expected));
        }
    }
}
