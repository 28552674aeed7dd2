//! Signal delivery for interactive sessions.
//!
//! While an agent runs in a pseudo-terminal the harness intercepts
//! window-resize and termination-class signals and relays them: a resize is
//! re-applied to the pty, everything else is re-sent to the agent's whole
//! process group so helpers the agent spawned are reached too.

use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use libc::c_int;
use signal_hook::iterator::Signals;
use signal_hook::low_level;
use tracing::{debug, warn};

use super::SharedMaster;
use super::terminal::Terminal;
use crate::exec::ExecError;

/// Signals relayed to an interactive agent.
pub const FORWARDED_SIGNALS: [c_int; 5] = [
    libc::SIGWINCH,
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGHUP,
    libc::SIGQUIT,
];

/// Message consumed by the forwarding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderEvent {
    Signal(c_int),
    Stop,
}

/// Where forwarded signals come from.
pub trait SignalSource: Send + Sync {
    /// Start delivering [`FORWARDED_SIGNALS`] into `sink`.
    fn subscribe(&self, sink: Sender<ForwarderEvent>) -> io::Result<Box<dyn SignalSubscription>>;
}

/// Registration returned by [`SignalSource::subscribe`].
pub trait SignalSubscription: Send {
    /// Stop delivering signals. Returns once nothing more will be sent.
    fn unsubscribe(self: Box<Self>);
}

/// Signals delivered to this process by the OS.
///
/// The first subscription installs one process-wide handler that stays for
/// the life of the process. While no session is subscribed, a termination
/// signal whose disposition was `SIG_DFL` before that handler went in gets
/// its default action, so the harness stays killable between sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

impl SignalSource for OsSignals {
    fn subscribe(&self, sink: Sender<ForwarderEvent>) -> io::Result<Box<dyn SignalSubscription>> {
        let hub = os_hub()?;
        hub.attach(sink);
        Ok(Box::new(HubSubscription { hub }))
    }
}

fn os_hub() -> io::Result<Arc<SignalHub>> {
    static HUB: Mutex<Option<Arc<SignalHub>>> = Mutex::new(None);

    let mut slot = HUB.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(hub) = slot.as_ref() {
        return Ok(Arc::clone(hub));
    }

    let default_when_idle = FORWARDED_SIGNALS
        .iter()
        .copied()
        .filter(|&signal| signal != libc::SIGWINCH && has_default_disposition(signal))
        .collect();
    let hub = Arc::new(SignalHub::new(default_when_idle));

    let mut signals = Signals::new(FORWARDED_SIGNALS)?;
    let pump = Arc::clone(&hub);
    thread::Builder::new()
        .name("mdtest-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                if pump.route(signal) == Route::Default {
                    debug!(signal = signal_name(signal), "no session; applying default action");
                    if let Err(e) = low_level::emulate_default_handler(signal) {
                        warn!(error = %e, "failed to apply default signal action");
                    }
                }
            }
        })?;

    *slot = Some(Arc::clone(&hub));
    Ok(hub)
}

fn has_default_disposition(signal: c_int) -> bool {
    // SAFETY: a null new action only queries; `current` is plain data
    // filled in by sigaction.
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    if unsafe { libc::sigaction(signal, std::ptr::null(), &mut current) } != 0 {
        return false;
    }
    current.sa_sigaction == libc::SIG_DFL
}

/// What happened to a signal that reached the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Forwarded,
    Default,
    Ignored,
}

/// Fans process signals out to the subscribed session, if any.
struct SignalHub {
    sink: Mutex<Option<Sender<ForwarderEvent>>>,
    default_when_idle: Vec<c_int>,
}

impl SignalHub {
    fn new(default_when_idle: Vec<c_int>) -> Self {
        Self {
            sink: Mutex::new(None),
            default_when_idle,
        }
    }

    fn attach(&self, sink: Sender<ForwarderEvent>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn detach(&self) {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn route(&self, signal: c_int) -> Route {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = sink.as_ref() {
            if tx.send(ForwarderEvent::Signal(signal)).is_ok() {
                return Route::Forwarded;
            }
            sink.take();
        }
        if self.default_when_idle.contains(&signal) {
            Route::Default
        } else {
            Route::Ignored
        }
    }
}

struct HubSubscription {
    hub: Arc<SignalHub>,
}

impl SignalSubscription for HubSubscription {
    fn unsubscribe(self: Box<Self>) {
        self.hub.detach();
    }
}

/// Signals raised by the caller instead of the OS.
///
/// Clones share one subscription slot, so a test can keep a clone and call
/// [`ManualSignals::raise`] while a session owns the other.
#[derive(Debug, Clone, Default)]
pub struct ManualSignals {
    slot: Arc<Mutex<Option<Sender<ForwarderEvent>>>>,
}

impl ManualSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `signal` to the subscribed session. Returns `false` when no
    /// session is listening.
    pub fn raise(&self, signal: c_int) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .is_some_and(|sink| sink.send(ForwarderEvent::Signal(signal)).is_ok())
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

struct ManualSubscription {
    slot: Arc<Mutex<Option<Sender<ForwarderEvent>>>>,
}

impl SignalSource for ManualSignals {
    fn subscribe(&self, sink: Sender<ForwarderEvent>) -> io::Result<Box<dyn SignalSubscription>> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(Box::new(ManualSubscription {
            slot: Arc::clone(&self.slot),
        }))
    }
}

impl SignalSubscription for ManualSubscription {
    fn unsubscribe(self: Box<Self>) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// What a forwarded signal acts on.
pub(crate) struct ForwardTarget {
    pub master: SharedMaster,
    pub terminal: Arc<dyn Terminal>,
    /// Process-group id of the agent (its pid; the agent leads its session).
    pub pgid: libc::pid_t,
}

/// Background loop relaying signals for one session.
pub(crate) struct SignalForwarder {
    tx: Sender<ForwarderEvent>,
    subscription: Box<dyn SignalSubscription>,
    worker: JoinHandle<Option<ExecError>>,
}

impl SignalForwarder {
    pub fn start(source: &dyn SignalSource, target: ForwardTarget) -> Result<Self, ExecError> {
        let (tx, rx) = mpsc::channel();
        let subscription = source
            .subscribe(tx.clone())
            .map_err(ExecError::SignalSubscribe)?;

        let worker = thread::spawn(move || {
            let mut first_error = None;
            while let Ok(event) = rx.recv() {
                let ForwarderEvent::Signal(signal) = event else {
                    break;
                };
                if let Err(e) = forward_signal(&target, signal) {
                    warn!(error = %e, "signal forwarding failed");
                    first_error.get_or_insert(e);
                }
            }
            first_error
        });

        Ok(Self {
            tx,
            subscription,
            worker,
        })
    }

    /// Unsubscribe, stop the loop and wait for it. Returns the first
    /// forwarding failure, if any.
    pub fn stop(self) -> Option<ExecError> {
        self.subscription.unsubscribe();
        let _ = self.tx.send(ForwarderEvent::Stop);
        match self.worker.join() {
            Ok(first_error) => first_error,
            Err(_) => Some(ExecError::Thread("signal forwarder")),
        }
    }
}

pub(crate) fn forward_signal(target: &ForwardTarget, signal: c_int) -> Result<(), ExecError> {
    debug!(signal = signal_name(signal), pgid = target.pgid, "forwarding signal");
    match signal {
        libc::SIGWINCH => {
            if !target.terminal.is_terminal() {
                return Ok(());
            }
            let size = target
                .terminal
                .size()
                .map_err(|source| ExecError::Terminal {
                    op: "forward SIGWINCH",
                    source,
                })?;
            let master = target.master.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(master) = master.as_ref() {
                master.resize(size).map_err(|cause| ExecError::Pty {
                    op: "forward SIGWINCH",
                    cause,
                })?;
            }
            Ok(())
        }
        libc::SIGINT | libc::SIGTERM | libc::SIGHUP | libc::SIGQUIT => {
            kill_process_group(target.pgid, signal).map_err(|source| ExecError::Signal {
                signal: signal_name(signal),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Send `signal` to every process in group `pgid`. A group that no longer
/// exists is not an error.
///
/// `pgid` must be above 1: `kill(0)` targets the caller's own group and
/// `kill(-1)` every process it may signal.
pub fn kill_process_group(pgid: libc::pid_t, signal: c_int) -> io::Result<()> {
    if pgid <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal process group {pgid}"),
        ));
    }
    // SAFETY: kill has no memory-safety preconditions.
    if unsafe { libc::kill(-pgid, signal) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(pgid, "process group already gone");
        return Ok(());
    }
    Err(err)
}

pub fn signal_name(signal: c_int) -> &'static str {
    match signal {
        libc::SIGWINCH => "SIGWINCH",
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGHUP => "SIGHUP",
        libc::SIGQUIT => "SIGQUIT",
        _ => "signal",
    }
}
