//! Process execution for agent runs.
//!
//! An [`ExecutionRequest`] is dispatched to one of two strategies chosen by
//! its `interactive` flag: the batch runner inherits the harness's standard
//! streams, the interactive runner attaches the agent to a pseudo-terminal
//! (see [`crate::supervisor`]). Both report a non-zero exit as a normal
//! [`ExecutionResult`]; an `Err` means the agent could not be launched or
//! managed at all.

pub mod batch;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::debug;

pub use batch::BatchRunner;

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Absolute working directory for the agent.
    pub working_dir: PathBuf,
    /// Program followed by its arguments. Must not be empty.
    pub argv: Vec<String>,
    pub interactive: bool,
}

/// Outcome of an agent that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("argv is empty")]
    EmptyArgv,
    #[error("execution cancelled before launch")]
    Cancelled,
    #[error("failed to launch {program:?}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {program:?}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program:?} was terminated by signal {signal}")]
    Signaled { program: String, signal: i32 },
    #[error("{program:?} was terminated by {signal}")]
    Terminated { program: String, signal: String },
    #[error("open pseudo-terminal: {0:#}")]
    OpenPty(anyhow::Error),
    #[error("start pty command {program:?}: {cause:#}")]
    PtySpawn {
        program: String,
        cause: anyhow::Error,
    },
    #[error("{op}: {cause:#}")]
    Pty {
        op: &'static str,
        cause: anyhow::Error,
    },
    #[error("{op}: {source}")]
    Terminal {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("forward {signal} to child session: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("subscribe to terminal signals: {0}")]
    SignalSubscribe(#[source] io::Error),
    #[error("{0} thread panicked")]
    Thread(&'static str),
    #[error("interactive mode is not supported on this platform")]
    Unsupported,
}

/// A strategy that executes requests.
pub trait Runner {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError>;
}

/// Shared flag that stops new agents from being launched.
///
/// Cancelling does not interrupt an agent that is already running.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Routes each request to the batch or interactive strategy.
pub struct ProcessRunner<B, I> {
    batch: B,
    interactive: I,
    cancel: CancelToken,
}

impl<B: Runner, I: Runner> ProcessRunner<B, I> {
    pub fn new(batch: B, interactive: I, cancel: CancelToken) -> Self {
        Self {
            batch,
            interactive,
            cancel,
        }
    }
}

#[cfg(unix)]
pub type SystemProcessRunner = ProcessRunner<BatchRunner, crate::supervisor::InteractiveRunner>;

#[cfg(not(unix))]
pub type SystemProcessRunner = ProcessRunner<BatchRunner, UnsupportedInteractive>;

/// Runner wired to the real process, terminal and signals.
pub fn system_runner(cancel: CancelToken) -> SystemProcessRunner {
    #[cfg(unix)]
    let interactive = crate::supervisor::InteractiveRunner::system();
    #[cfg(not(unix))]
    let interactive = UnsupportedInteractive;

    ProcessRunner::new(BatchRunner, interactive, cancel)
}

impl<B: Runner, I: Runner> Runner for ProcessRunner<B, I> {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        if request.argv.is_empty() {
            return Err(ExecError::EmptyArgv);
        }
        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        debug!(
            interactive = request.interactive,
            program = %request.argv[0],
            "dispatching agent run"
        );
        if request.interactive {
            self.interactive.run(request)
        } else {
            self.batch.run(request)
        }
    }
}

/// Interactive strategy for platforms without process groups.
#[cfg(not(unix))]
pub struct UnsupportedInteractive;

#[cfg(not(unix))]
impl Runner for UnsupportedInteractive {
    fn run(&self, _request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        Err(ExecError::Unsupported)
    }
}
