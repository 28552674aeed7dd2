//! Suite orchestration.
//!
//! For every test, in lexical order: allocate a log location, create its
//! directory, render the prompt, build the agent command, run it and read
//! the verdict back from the log. Setup failures abort the suite; a missing
//! or unreadable verdict is recorded as a failed test and the loop moves on.
//!
//! Everything with side effects goes through [`SuiteEnv`] so the loop can be
//! driven by fakes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::{self, AgentError, CommandOptions, ResolvedAgent};
use crate::discovery::{self, DiscoveryError};
use crate::exec::{ExecError, ExecutionRequest, ExecutionResult, Runner};
use crate::log::{self, LocationError, ResultLocation, Status, StatusError};
use crate::prompt;

/// What to run and how.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Suite root. Relative paths resolve against the current directory.
    pub root: PathBuf,
    /// Explicit targets. Empty means discover everything under `root`.
    pub files: Vec<String>,
    pub agent: ResolvedAgent,
    pub interactive: bool,
    pub dangerously_allow_all_actions: bool,
}

/// Verdict for one test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Root-relative, `/`-separated.
    pub test: String,
    pub log_path: PathBuf,
    pub status: Status,
    /// Set for failed tests.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub outcomes: Vec<TestOutcome>,
}

impl SuiteSummary {
    fn record(&mut self, outcome: TestOutcome) {
        match outcome.status {
            Status::Pass => self.passed += 1,
            Status::Fail => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// A failure that stops the suite before a summary exists.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("resolve root {}: {source}", root.display())]
    ResolveRoot {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("discover tests: {0}")]
    Discover(#[source] DiscoveryError),
    #[error("no tests found under {}", .0.display())]
    NoTests(PathBuf),
    #[error("next log path for {test}: {source}")]
    Allocate {
        test: String,
        #[source]
        source: LocationError,
    },
    #[error("create log dir {} for {test}: {source}", path.display())]
    CreateDir {
        test: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("build command for {test}: {source}")]
    Command {
        test: String,
        #[source]
        source: AgentError,
    },
    #[error("execute {test}: {source}")]
    Execute {
        test: String,
        #[source]
        source: ExecError,
    },
}

/// Side effects used by [`run_suite`].
///
/// Only [`SuiteEnv::execute`] has no default; the rest fall back to the real
/// filesystem, clock and collaborators.
pub trait SuiteEnv {
    fn discover(&self, root_abs: &Path) -> Result<Vec<String>, DiscoveryError> {
        discovery::discover_tests(root_abs)
    }

    fn resolve_targets(
        &self,
        root_abs: &Path,
        files: &[String],
    ) -> Result<Vec<String>, DiscoveryError> {
        discovery::resolve_explicit_tests(root_abs, files)
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn allocate(&self, test_abs: &Path, at: DateTime<Utc>) -> Result<ResultLocation, LocationError> {
        log::allocate(test_abs, at)
    }

    fn create_dir(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn build_prompt(&self, test_abs: &Path, log_abs: &Path) -> String {
        prompt::render(test_abs, log_abs)
    }

    fn parse_status(&self, log_abs: &Path) -> Result<Status, StatusError> {
        log::parse_status(log_abs)
    }

    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError>;
}

/// The real environment, executing through `runner`.
pub struct SystemEnv<R> {
    runner: R,
}

impl<R: Runner> SystemEnv<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: Runner> SuiteEnv for SystemEnv<R> {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        self.runner.run(request)
    }
}

/// Run every selected test and write the summary line to `out`.
pub fn run_suite<E>(
    config: &SuiteConfig,
    env: &E,
    out: &mut dyn Write,
) -> Result<SuiteSummary, SetupError>
where
    E: SuiteEnv + ?Sized,
{
    let root_abs = absolute_root(&config.root)?;

    let mut tests = if config.files.is_empty() {
        env.discover(&root_abs)
    } else {
        env.resolve_targets(&root_abs, &config.files)
    }
    .map_err(SetupError::Discover)?;
    tests.sort();
    tests.dedup();
    if tests.is_empty() {
        return Err(SetupError::NoTests(root_abs));
    }

    info!(
        root = %root_abs.display(),
        tests = tests.len(),
        agent = %config.agent.name,
        interactive = config.interactive,
        "running suite"
    );

    let options = CommandOptions {
        interactive: config.interactive,
        dangerously_allow_all_actions: config.dangerously_allow_all_actions,
    };
    let mut summary = SuiteSummary {
        total: tests.len(),
        outcomes: Vec::with_capacity(tests.len()),
        ..Default::default()
    };

    for test in tests {
        let outcome = run_one(&test, &root_abs, &config.agent, options, env)?;
        summary.record(outcome);
    }

    if let Err(e) = writeln!(
        out,
        "Total: {}, Passed: {}, Failed: {}",
        summary.total, summary.passed, summary.failed
    ) {
        warn!(error = %e, "failed to write suite summary");
    }
    Ok(summary)
}

fn run_one<E>(
    test: &str,
    root_abs: &Path,
    agent: &ResolvedAgent,
    options: CommandOptions,
    env: &E,
) -> Result<TestOutcome, SetupError>
where
    E: SuiteEnv + ?Sized,
{
    let test_abs = root_abs.join(test);
    let location = env
        .allocate(&test_abs, env.now())
        .map_err(|source| SetupError::Allocate {
            test: test.to_string(),
            source,
        })?;
    env.create_dir(&location.dir)
        .map_err(|source| SetupError::CreateDir {
            test: test.to_string(),
            path: location.dir.clone(),
            source,
        })?;

    let prompt = env.build_prompt(&test_abs, &location.path);
    let argv = agent::command_args(agent, &prompt, options).map_err(|source| SetupError::Command {
        test: test.to_string(),
        source,
    })?;

    info!(test, log = %location.path.display(), "running test");
    let request = ExecutionRequest {
        working_dir: root_abs.to_path_buf(),
        argv,
        interactive: options.interactive,
    };
    let result = env
        .execute(&request)
        .map_err(|source| SetupError::Execute {
            test: test.to_string(),
            source,
        })?;

    let (status, reason) = match env.parse_status(&location.path) {
        Ok(Status::Pass) => (Status::Pass, None),
        Ok(Status::Fail) => (
            Status::Fail,
            Some(format!("status=fail (agent exit code {})", result.exit_code)),
        ),
        Err(e) => (
            Status::Fail,
            Some(format!("log parse error: {e} (agent exit code {})", result.exit_code)),
        ),
    };
    debug!(test, status = %status, exit_code = result.exit_code, "test finished");

    Ok(TestOutcome {
        test: test.to_string(),
        log_path: location.path,
        status,
        reason,
    })
}

fn absolute_root(root: &Path) -> Result<PathBuf, SetupError> {
    let root = if root.as_os_str().is_empty() {
        Path::new(".")
    } else {
        root
    };
    std::path::absolute(root).map_err(|source| SetupError::ResolveRoot {
        root: root.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentName;
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// In-memory environment: verdicts are keyed by test file name and the
    /// "agent" is never launched.
    struct FakeEnv {
        tests: Vec<String>,
        verdicts: HashMap<String, Result<Status, ()>>,
        exit_code: i32,
        discover_calls: Cell<usize>,
        requests: RefCell<Vec<ExecutionRequest>>,
        logs: RefCell<HashMap<PathBuf, String>>,
        fail_allocate: bool,
        fail_execute: bool,
    }

    impl FakeEnv {
        fn new(tests: &[&str]) -> Self {
            Self {
                tests: tests.iter().map(|t| t.to_string()).collect(),
                verdicts: HashMap::new(),
                exit_code: 0,
                discover_calls: Cell::new(0),
                requests: RefCell::new(Vec::new()),
                logs: RefCell::new(HashMap::new()),
                fail_allocate: false,
                fail_execute: false,
            }
        }

        fn verdict(mut self, test: &str, verdict: Result<Status, ()>) -> Self {
            self.verdicts.insert(test.to_string(), verdict);
            self
        }
    }

    impl SuiteEnv for FakeEnv {
        fn discover(&self, _root_abs: &Path) -> Result<Vec<String>, DiscoveryError> {
            self.discover_calls.set(self.discover_calls.get() + 1);
            Ok(self.tests.clone())
        }

        fn resolve_targets(
            &self,
            _root_abs: &Path,
            files: &[String],
        ) -> Result<Vec<String>, DiscoveryError> {
            Ok(files.to_vec())
        }

        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 2, 10, 14, 30, 0).unwrap()
        }

        fn allocate(
            &self,
            test_abs: &Path,
            at: DateTime<Utc>,
        ) -> Result<ResultLocation, LocationError> {
            if self.fail_allocate {
                return Err(LocationError::NotATest(test_abs.to_path_buf()));
            }
            log::allocate(test_abs, at)
        }

        fn create_dir(&self, _dir: &Path) -> io::Result<()> {
            Ok(())
        }

        fn parse_status(&self, log_abs: &Path) -> Result<Status, StatusError> {
            let logs = self.logs.borrow();
            let test = logs.get(log_abs).ok_or(StatusError::Empty)?;
            match self.verdicts.get(test) {
                Some(Ok(status)) => Ok(*status),
                Some(Err(())) | None => Err(StatusError::MissingStatus),
            }
        }

        fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
            if self.fail_execute {
                return Err(ExecError::Launch {
                    program: request.argv[0].clone(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }
            self.requests.borrow_mut().push(request.clone());

            // Remember which test this log belongs to, using the prompt line.
            let prompt = request.argv.last().cloned().unwrap_or_default();
            let test = line_value(&prompt, "Read the test from this exact absolute path: ");
            let log = line_value(&prompt, "Write the output log to this exact absolute path: ");
            let name = Path::new(&test).file_name().unwrap().to_string_lossy().into_owned();
            self.logs.borrow_mut().insert(PathBuf::from(log), name);

            Ok(ExecutionResult {
                exit_code: self.exit_code,
            })
        }
    }

    fn line_value(prompt: &str, prefix: &str) -> String {
        prompt
            .lines()
            .find_map(|line| line.strip_prefix(prefix))
            .unwrap()
            .to_string()
    }

    fn config(files: &[&str]) -> SuiteConfig {
        SuiteConfig {
            root: PathBuf::from("/suite"),
            files: files.iter().map(|f| f.to_string()).collect(),
            agent: ResolvedAgent::new(AgentName::Claude),
            interactive: false,
            dangerously_allow_all_actions: false,
        }
    }

    #[test]
    fn all_passing_suite() {
        let env = FakeEnv::new(&["b.test.md", "a.test.md"])
            .verdict("a.test.md", Ok(Status::Pass))
            .verdict("b.test.md", Ok(Status::Pass));
        let mut out = Vec::new();

        let summary = run_suite(&config(&[]), &env, &mut out).unwrap();
        assert_eq!((summary.total, summary.passed, summary.failed), (2, 2, 0));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Total: 2, Passed: 2, Failed: 0\n"
        );
        let order: Vec<_> = summary.outcomes.iter().map(|o| o.test.as_str()).collect();
        assert_eq!(order, ["a.test.md", "b.test.md"]);
        assert!(summary.outcomes.iter().all(|o| o.reason.is_none()));
    }

    #[test]
    fn fail_status_and_parse_errors_are_recorded_and_the_loop_continues() {
        let mut env = FakeEnv::new(&["a.test.md", "b.test.md", "c.test.md"])
            .verdict("a.test.md", Ok(Status::Fail))
            .verdict("b.test.md", Err(()))
            .verdict("c.test.md", Ok(Status::Pass));
        env.exit_code = 3;
        let mut out = Vec::new();

        let summary = run_suite(&config(&[]), &env, &mut out).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed + summary.failed, summary.total);
        assert_eq!(summary.failed, 2);

        assert_eq!(
            summary.outcomes[0].reason.as_deref(),
            Some("status=fail (agent exit code 3)")
        );
        assert_eq!(
            summary.outcomes[1].reason.as_deref(),
            Some("log parse error: missing status key (agent exit code 3)")
        );
        assert_eq!(summary.outcomes[2].status, Status::Pass);
    }

    #[test]
    fn explicit_targets_skip_discovery() {
        let env = FakeEnv::new(&["a.test.md"]).verdict("x.test.md", Ok(Status::Pass));
        let summary = run_suite(&config(&["x.test.md"]), &env, &mut io::sink()).unwrap();

        assert_eq!(env.discover_calls.get(), 0);
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.outcomes[0].test, "x.test.md");
    }

    #[test]
    fn empty_suite_is_a_setup_error() {
        let env = FakeEnv::new(&[]);
        let mut out = Vec::new();
        let err = run_suite(&config(&[]), &env, &mut out).unwrap_err();
        assert!(matches!(err, SetupError::NoTests(_)));
        assert!(out.is_empty(), "no summary on setup failure");
    }

    #[test]
    fn allocation_failure_aborts_naming_the_test() {
        let mut env = FakeEnv::new(&["a.test.md"]);
        env.fail_allocate = true;
        let err = run_suite(&config(&[]), &env, &mut io::sink()).unwrap_err();
        assert!(matches!(err, SetupError::Allocate { ref test, .. } if test == "a.test.md"));
    }

    #[test]
    fn execution_failure_aborts_without_summary() {
        let mut env = FakeEnv::new(&["a.test.md", "b.test.md"]);
        env.fail_execute = true;
        let mut out = Vec::new();

        let err = run_suite(&config(&[]), &env, &mut out).unwrap_err();
        assert!(err.to_string().starts_with("execute a.test.md:"), "{err}");
        assert!(out.is_empty());
    }

    #[test]
    fn empty_program_aborts_at_command_build() {
        let env = FakeEnv::new(&["a.test.md"]);
        let mut config = config(&[]);
        config.agent.program = String::new();

        let err = run_suite(&config, &env, &mut io::sink()).unwrap_err();
        assert!(matches!(err, SetupError::Command { .. }));
        assert!(env.requests.borrow().is_empty());
    }

    #[test]
    fn requests_run_in_root_with_log_stamped_by_clock() {
        let env = FakeEnv::new(&["dir/a.test.md"]).verdict("a.test.md", Ok(Status::Pass));
        let mut config = config(&[]);
        config.interactive = true;

        let summary = run_suite(&config, &env, &mut io::sink()).unwrap();
        let requests = env.requests.borrow();
        assert_eq!(requests[0].working_dir, PathBuf::from("/suite"));
        assert!(requests[0].interactive);
        assert_eq!(requests[0].argv[0], "claude");
        assert_eq!(
            summary.outcomes[0].log_path,
            PathBuf::from("/suite/dir/a.logs/2026-02-10T14-30-00Z.log.md")
        );
    }

    #[test]
    #[cfg(unix)]
    fn system_env_runs_a_stub_agent_end_to_end() {
        use crate::exec::BatchRunner;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.test.md"), "# a\n").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested/b.test.md"), "# b\n").unwrap();

        let stub = root.join("agent.sh");
        fs::write(
            &stub,
            "#!/bin/sh\n\
             for last; do :; done\n\
             log=$(printf '%s\\n' \"$last\" | sed -n 's/^Write the output log to this exact absolute path: //p')\n\
             case \"$log\" in *nested*) exit 4 ;; esac\n\
             printf -- '---\\nstatus: pass\\n---\\nok\\n' > \"$log\"\n",
        )
        .unwrap();
        fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).unwrap();

        let config = SuiteConfig {
            root: root.to_path_buf(),
            files: Vec::new(),
            agent: ResolvedAgent {
                name: AgentName::Codex,
                program: stub.to_string_lossy().into_owned(),
            },
            interactive: false,
            dangerously_allow_all_actions: false,
        };
        let mut out = Vec::new();
        let summary = run_suite(&config, &SystemEnv::new(BatchRunner), &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Total: 2, Passed: 1, Failed: 1\n"
        );
        assert_eq!(summary.outcomes[0].test, "a.test.md");
        assert_eq!(summary.outcomes[0].status, Status::Pass);
        let reason = summary.outcomes[1].reason.as_deref().unwrap();
        assert!(reason.starts_with("log parse error: read log"), "{reason}");
        assert!(reason.ends_with("(agent exit code 4)"), "{reason}");
        assert!(root.join("nested/b.logs").is_dir());
    }
}
