#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// Agent stub: pulls the log path out of the prompt (its last argument) and
/// writes `status: pass`, except for tests whose path matches `$SKIP`.
const STUB: &str = r#"#!/bin/sh
for last; do :; done
test_path=$(printf '%s\n' "$last" | sed -n 's/^Read the test from this exact absolute path: //p')
log_path=$(printf '%s\n' "$last" | sed -n 's/^Write the output log to this exact absolute path: //p')
case "$test_path" in
  *"$SKIP"*) exit 0 ;;
esac
printf -- '---\nstatus: pass\n---\n\nAll steps passed.\n' > "$log_path"
"#;

fn project(skip: Option<&str>) -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    fs::write(root.join("a.test.md"), "# A\n\n1. Check a.\n").unwrap();
    fs::write(root.join("b.test.md"), "# B\n\n1. Check b.\n").unwrap();
    fs::write(root.join("README.md"), "not a test\n").unwrap();

    let stub = root.join("fake-claude.sh");
    // An empty pattern would match every path.
    let skip = skip.unwrap_or("\u{1}");
    fs::write(&stub, STUB.replace("$SKIP", skip)).unwrap();
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();

    fs::create_dir(root.join(".mdtest")).unwrap();
    fs::write(
        root.join(".mdtest/config.toml"),
        format!(
            "[defaults]\nagent = \"claude\"\n\n[agents.claude]\nprogram = \"{}\"\n",
            stub.display()
        ),
    )
    .unwrap();
    tmp
}

fn mdtest(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mdtest").unwrap();
    cmd.current_dir(root).write_stdin("");
    cmd
}

fn single_log(dir: &Path) -> String {
    let entries: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(entries.len(), 1, "{entries:?}");
    fs::read_to_string(&entries[0]).unwrap()
}

#[test]
fn all_passing_suite_exits_zero() {
    let tmp = project(None);

    mdtest(tmp.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 2, Passed: 2, Failed: 0"));

    assert!(single_log(&tmp.path().join("a.logs")).starts_with("---\nstatus: pass\n"));
    assert!(single_log(&tmp.path().join("b.logs")).starts_with("---\nstatus: pass\n"));
}

#[test]
fn missing_log_fails_only_that_test() {
    let tmp = project(Some("b.test.md"));

    mdtest(tmp.path())
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Total: 2, Passed: 1, Failed: 1"))
        .stderr(predicate::str::contains("1 test(s) failed"));

    assert!(tmp.path().join("b.logs").is_dir());
    assert_eq!(fs::read_dir(tmp.path().join("b.logs")).unwrap().count(), 0);
}

#[test]
fn explicit_target_runs_only_that_test() {
    let tmp = project(None);

    mdtest(tmp.path())
        .args(["run", "b.test.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 1, Passed: 1, Failed: 0"));

    assert!(!tmp.path().join("a.logs").exists());
}

#[test]
fn explicit_target_outside_root_is_a_setup_error() {
    let tmp = project(None);

    mdtest(tmp.path())
        .args(["run", "../elsewhere.test.md"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("outside root"));
}

#[test]
fn empty_root_is_a_setup_error() {
    let tmp = project(None);
    fs::create_dir(tmp.path().join("empty")).unwrap();

    mdtest(tmp.path())
        .args(["run", "--dir", "empty"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no tests found"));
}

#[test]
fn unknown_agent_is_a_setup_error() {
    let tmp = project(None);

    mdtest(tmp.path())
        .args(["run", "--agent", "gemini"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid agent mode"));
}

#[test]
fn rerun_in_same_second_gets_a_fresh_log() {
    let tmp = project(None);

    for _ in 0..2 {
        mdtest(tmp.path()).args(["run", "a.test.md"]).assert().success();
    }
    assert_eq!(fs::read_dir(tmp.path().join("a.logs")).unwrap().count(), 2);
}
