//! Interactive agent sessions on a pseudo-terminal.
//!
//! Spawns the agent in a pseudo-terminal and bridges it to the user: stdin is
//! copied into the pty, pty output is copied to stdout, and resize and
//! termination signals are relayed (see [`signals`]). When the harness's
//! stdin is a real terminal it is put into raw mode for the duration of the
//! session so single keystrokes reach the agent.
//!
//! Teardown order is fixed: wait for the agent, close the pty master, drain
//! the output loop, stop the signal forwarder, restore the terminal. The
//! restore runs on every path once raw mode was entered.

pub mod signals;
pub mod terminal;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info, warn};

use crate::exec::{ExecError, ExecutionRequest, ExecutionResult, Runner};
use signals::{ForwardTarget, OsSignals, SignalForwarder, SignalSource};
use terminal::{SavedMode, StdinTerminal, Terminal};

/// Pty master shared with the signal forwarder. `None` once closed.
pub(crate) type SharedMaster = Arc<Mutex<Option<Box<dyn MasterPty + Send>>>>;

/// Writer half of the pty master. The detached stdin pump only writes
/// through this slot, so clearing it releases the last master fd.
type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

type AgentChild = Box<dyn Child + Send + Sync>;

const DEFAULT_PTY_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

/// Streams bridged to the agent for one session.
pub struct SessionStreams {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

impl SessionStreams {
    /// The harness's own stdin and stdout.
    pub fn stdio() -> Self {
        Self {
            input: Box::new(io::stdin()),
            output: Box::new(io::stdout()),
        }
    }
}

type StreamFactory = Box<dyn Fn() -> SessionStreams + Send + Sync>;

/// Runs agents attached to a pseudo-terminal.
pub struct InteractiveRunner {
    terminal: Arc<dyn Terminal>,
    signals: Arc<dyn SignalSource>,
    streams: StreamFactory,
}

impl InteractiveRunner {
    /// Runner bound to the real stdin/stdout, controlling terminal and OS
    /// signals.
    pub fn system() -> Self {
        Self {
            terminal: Arc::new(StdinTerminal::new()),
            signals: Arc::new(OsSignals),
            streams: Box::new(SessionStreams::stdio),
        }
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn Terminal>) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn with_signals(mut self, signals: Arc<dyn SignalSource>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_streams<F>(mut self, streams: F) -> Self
    where
        F: Fn() -> SessionStreams + Send + Sync + 'static,
    {
        self.streams = Box::new(streams);
        self
    }

    /// Running and Draining: everything between launch and terminal
    /// restore. Returns the wait outcome plus secondary failures in the
    /// order they were captured.
    ///
    /// A signal death surfaces as [`ExecError::Terminated`]. portable-pty
    /// only keeps the signal's description, not its number.
    fn supervise(
        &self,
        program: &str,
        mut child: AgentChild,
        master: &SharedMaster,
        pty_io: PtyIo,
        pgid: libc::pid_t,
    ) -> (Result<ExecutionResult, ExecError>, Vec<ExecError>) {
        let target = ForwardTarget {
            master: Arc::clone(master),
            terminal: Arc::clone(&self.terminal),
            pgid,
        };
        let writer: SharedWriter = Arc::new(Mutex::new(Some(pty_io.writer)));
        let forwarder = match SignalForwarder::start(self.signals.as_ref(), target) {
            Ok(forwarder) => forwarder,
            Err(e) => {
                close_pty(master, &writer);
                return (Err(abort(&mut child, e)), Vec::new());
            }
        };

        let streams = (self.streams)();
        // Detached: it blocks on the harness's input and ends on its next
        // read once the writer slot is empty.
        spawn_input_pump(streams.input, Arc::clone(&writer));
        let output = spawn_output_pump(pty_io.reader, streams.output);

        let waited = child.wait();
        close_pty(master, &writer);

        let mut secondary = Vec::new();
        if output.join().is_err() {
            secondary.push(ExecError::Thread("pty output"));
        }
        if let Some(e) = forwarder.stop() {
            secondary.push(e);
        }

        let wait = match waited {
            Ok(status) => result_from_status(program, &status),
            Err(source) => Err(ExecError::Wait {
                program: program.to_string(),
                source,
            }),
        };
        (wait, secondary)
    }
}

impl Runner for InteractiveRunner {
    fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let (program, args) = request.argv.split_first().ok_or(ExecError::EmptyArgv)?;

        // Starting
        let pair = native_pty_system()
            .openpty(DEFAULT_PTY_SIZE)
            .map_err(ExecError::OpenPty)?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(&request.working_dir);

        info!(
            program = %program,
            work_dir = %request.working_dir.display(),
            "spawning agent in PTY"
        );

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|cause| ExecError::PtySpawn {
                program: program.clone(),
                cause,
            })?;

        // Only the master side is used from here on.
        drop(pair.slave);
        let master = pair.master;

        let pty_io = match PtyIo::split(master.as_ref()) {
            Ok(pty_io) => pty_io,
            Err(e) => return Err(abort(&mut child, e)),
        };
        let pgid = match child.process_id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            Some(pid) => pid,
            None => {
                let e = ExecError::Pty {
                    op: "read agent pid",
                    cause: anyhow::anyhow!("pty child reported no process id"),
                };
                return Err(abort(&mut child, e));
            }
        };

        // Preparing the controlling terminal
        let session = match TerminalSession::prepare(Arc::clone(&self.terminal), master.as_ref()) {
            Ok(session) => session,
            Err(e) => return Err(abort(&mut child, e)),
        };

        let master: SharedMaster = Arc::new(Mutex::new(Some(master)));
        let (wait, mut secondary) = self.supervise(program, child, &master, pty_io, pgid);

        // Restoring
        if let Err(e) = session.restore() {
            secondary.push(e);
        }

        settle(wait, secondary)
    }
}

/// Reader and writer cloned off the pty master.
struct PtyIo {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

impl PtyIo {
    fn split(master: &dyn MasterPty) -> Result<Self, ExecError> {
        let reader = master.try_clone_reader().map_err(|cause| ExecError::Pty {
            op: "clone PTY reader",
            cause,
        })?;
        let writer = master.take_writer().map_err(|cause| ExecError::Pty {
            op: "take PTY writer",
            cause,
        })?;
        Ok(Self { reader, writer })
    }
}

/// Raw-mode ownership for one session.
///
/// [`TerminalSession::restore`] reports the restore outcome; dropping an
/// unrestored session (on unwind) still restores, silently.
struct TerminalSession {
    terminal: Arc<dyn Terminal>,
    saved: Option<SavedMode>,
}

impl TerminalSession {
    fn prepare(terminal: Arc<dyn Terminal>, master: &dyn MasterPty) -> Result<Self, ExecError> {
        if !terminal.is_terminal() {
            debug!("stdin is not a terminal; skipping raw mode");
            return Ok(Self {
                terminal,
                saved: None,
            });
        }

        let size = terminal.size().map_err(|source| ExecError::Terminal {
            op: "inherit tty size",
            source,
        })?;
        master.resize(size).map_err(|cause| ExecError::Pty {
            op: "inherit tty size",
            cause,
        })?;

        let saved = terminal.make_raw().map_err(|source| ExecError::Terminal {
            op: "set terminal raw mode",
            source,
        })?;
        Ok(Self {
            terminal,
            saved: Some(saved),
        })
    }

    fn restore(mut self) -> Result<(), ExecError> {
        let Some(mode) = self.saved.take() else {
            return Ok(());
        };
        self.terminal
            .restore(&mode)
            .map_err(|source| ExecError::Terminal {
                op: "restore terminal state",
                source,
            })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Some(mode) = self.saved.take() {
            let _ = self.terminal.restore(&mode);
        }
    }
}

/// Pick the reported error: a failed wait wins, otherwise the first
/// secondary failure. Everything else is logged.
fn settle(
    wait: Result<ExecutionResult, ExecError>,
    secondary: Vec<ExecError>,
) -> Result<ExecutionResult, ExecError> {
    let mut secondary = secondary.into_iter();
    let reported = match wait {
        Ok(result) => match secondary.next() {
            None => return Ok(result),
            Some(first) => first,
        },
        Err(e) => e,
    };
    for discarded in secondary {
        warn!(error = %discarded, "discarding secondary session error");
    }
    Err(reported)
}

/// Kill and reap a child whose session could not be set up.
fn abort(child: &mut AgentChild, error: ExecError) -> ExecError {
    warn!(error = %error, "aborting agent session");
    if let Err(e) = child.kill() {
        debug!("kill after failed setup: {e}");
    }
    if let Err(e) = child.wait() {
        debug!("reap after failed setup: {e}");
    }
    error
}

fn result_from_status(
    program: &str,
    status: &portable_pty::ExitStatus,
) -> Result<ExecutionResult, ExecError> {
    if let Some(signal) = status.to_string().strip_prefix(TERMINATED_PREFIX) {
        return Err(ExecError::Terminated {
            program: program.to_string(),
            signal: signal.to_string(),
        });
    }
    let exit_code = i32::try_from(status.exit_code()).unwrap_or(i32::MAX);
    info!(exit_code, success = status.success(), "agent process exited");
    Ok(ExecutionResult { exit_code })
}

/// How portable-pty renders a status for a child killed by a signal.
const TERMINATED_PREFIX: &str = "Terminated by ";

/// Drop every handle on the pty master this session still owns.
fn close_pty(master: &SharedMaster, writer: &SharedWriter) {
    let writer = writer.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(writer);
    let master = master.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(master);
}

fn spawn_input_pump(mut input: Box<dyn Read + Send>, pty: SharedWriter) {
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            let mut slot = pty.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(writer) = slot.as_mut() else {
                debug!("pty closed; dropping {n} bytes of input");
                break;
            };
            if writer.write_all(&buf[..n]).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });
}

fn spawn_output_pump(
    mut pty: Box<dyn Read + Send>,
    mut output: Box<dyn Write + Send>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut sink_open = true;
        loop {
            let n = match pty.read(&mut buf) {
                Ok(0) => break, // every holder of the subordinate side is gone
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("PTY read ended: {e}");
                    break;
                }
            };

            // Keep draining after the sink fails so the agent never blocks
            // on a full pty buffer.
            if sink_open {
                sink_open = output.write_all(&buf[..n]).is_ok() && output.flush().is_ok();
            }
        }
    })
}
