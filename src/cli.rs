use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use crate::agent::{self, AgentMode, Lookup};
use crate::config::ProjectConfig;
use crate::suite::{SetupError, SuiteConfig, SuiteSummary};

/// Every test passed.
pub const EXIT_OK: i32 = 0;
/// At least one test failed.
pub const EXIT_FAILED: i32 = 1;
/// The suite could not run: bad flags, no agent, no tests, launch failure.
pub const EXIT_SETUP: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "mdtest",
    about = "Run markdown tests through a coding agent",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run markdown tests
    Run(RunArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// Test files to run (default: every *.test.md under --dir)
    pub files: Vec<String>,

    /// Agent mode: auto, claude, or codex
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Suite root directory
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Run agent in interactive mode
    #[arg(short, long)]
    pub interactive: bool,

    /// Disable agent safety approvals/sandboxing
    #[arg(short = 'A', long)]
    pub dangerously_allow_all_actions: bool,
}

/// Runs a configured suite, writing the summary line to the given sink.
pub type SuiteFn<'a> =
    &'a dyn Fn(&SuiteConfig, &mut dyn Write) -> Result<SuiteSummary, SetupError>;

/// Parse `args` (program name first). On failure the clap message has been
/// written and the exit code is returned instead.
pub fn parse<I, T>(args: I, stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<Cli, i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| {
        let rendered = e.render();
        if e.use_stderr() {
            let _ = write!(stderr, "{rendered}");
            EXIT_SETUP
        } else {
            let _ = write!(stdout, "{rendered}");
            EXIT_OK
        }
    })
}

/// Run a parsed command line and return the process exit code.
pub fn run(
    cli: Cli,
    config: &ProjectConfig,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    lookup: Lookup<'_>,
    run_suite: SuiteFn<'_>,
) -> i32 {
    let Command::Run(args) = cli.command;
    match run_tests(&args, config, stdout, lookup, run_suite) {
        Ok(summary) if summary.failed > 0 => {
            let _ = writeln!(stderr, "{} test(s) failed", summary.failed);
            EXIT_FAILED
        }
        Ok(_) => EXIT_OK,
        Err(e) => {
            let _ = writeln!(stderr, "{e}");
            EXIT_SETUP
        }
    }
}

/// [`parse`] followed by [`run`].
pub fn execute<I, T>(
    args: I,
    config: &ProjectConfig,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    lookup: Lookup<'_>,
    run_suite: SuiteFn<'_>,
) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match parse(args, stdout, stderr) {
        Ok(cli) => run(cli, config, stdout, stderr, lookup, run_suite),
        Err(code) => code,
    }
}

fn run_tests(
    args: &RunArgs,
    config: &ProjectConfig,
    stdout: &mut dyn Write,
    lookup: Lookup<'_>,
    run_suite: SuiteFn<'_>,
) -> Result<SuiteSummary> {
    let mode: AgentMode = args
        .agent
        .as_deref()
        .unwrap_or(&config.defaults.agent)
        .parse()?;
    let resolved = agent::resolve(mode, &config.programs(), lookup)?;
    debug!(agent = %resolved.name, program = %resolved.program, "resolved agent");

    let suite = SuiteConfig {
        root: args.dir.clone(),
        files: args.files.clone(),
        agent: resolved,
        interactive: args.interactive || config.defaults.interactive,
        dangerously_allow_all_actions: args.dangerously_allow_all_actions
            || config.defaults.dangerously_allow_all_actions,
    };
    Ok(run_suite(&suite, stdout)?)
}
