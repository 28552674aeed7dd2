use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use mdtest::agent::lookup_path;
use mdtest::cli;
use mdtest::config::ProjectConfig;
use mdtest::exec::{CancelToken, system_runner};
use mdtest::suite::{SuiteConfig, SystemEnv, run_suite};

fn main() -> ExitCode {
    let code = match try_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            cli::EXIT_SETUP
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn try_main() -> Result<i32> {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let cli = match cli::parse(std::env::args_os(), &mut stdout, &mut stderr) {
        Ok(cli) => cli,
        Err(code) => return Ok(code),
    };

    let filter = match cli.verbose {
        0 => "mdtest=warn",
        1 => "mdtest=info",
        2 => "mdtest=debug",
        _ => "mdtest=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => debug!("no .mdtest/config.toml found, using defaults"),
    }

    // Ctrl-C stops further agents from launching; the running one receives
    // the signal itself.
    let cancel = CancelToken::new();
    if let Err(e) = install_cancel_handler(&cancel) {
        warn!(error = %e, "failed to install Ctrl-C handler; interrupts will not stop the suite");
    }

    let env = SystemEnv::new(system_runner(cancel));
    let suite = |config: &SuiteConfig, out: &mut dyn io::Write| run_suite(config, &env, out);

    Ok(cli::run(
        cli,
        &config,
        &mut stdout,
        &mut stderr,
        &lookup_path,
        &suite,
    ))
}

fn install_cancel_handler(cancel: &CancelToken) -> Result<(), ctrlc::Error> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || cancel.cancel())
}
