//! Controlling-terminal access for interactive sessions.
//!
//! The supervisor only needs four things from the user's terminal: whether
//! there is one, its size, and a way to enter raw mode and come back. They
//! sit behind [`Terminal`] so sessions can run against a fake.

use std::fmt;
use std::io::{self, IsTerminal};
use std::os::fd::RawFd;

use portable_pty::PtySize;

/// Terminal mode saved before switching to raw mode.
pub struct SavedMode(Option<libc::termios>);

impl SavedMode {
    /// A mode that restores nothing. Used by terminals that never touch a
    /// real device.
    pub fn detached() -> Self {
        Self(None)
    }
}

impl fmt::Debug for SavedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SavedMode")
            .field(&if self.0.is_some() { "termios" } else { "detached" })
            .finish()
    }
}

pub trait Terminal: Send + Sync {
    /// Whether the harness's input is attached to a terminal device.
    fn is_terminal(&self) -> bool;

    fn size(&self) -> io::Result<PtySize>;

    /// Switch to raw mode, returning the mode to restore later.
    fn make_raw(&self) -> io::Result<SavedMode>;

    fn restore(&self, mode: &SavedMode) -> io::Result<()>;
}

/// The terminal behind the harness's standard input.
#[derive(Debug, Clone, Copy)]
pub struct StdinTerminal {
    fd: RawFd,
}

impl StdinTerminal {
    pub fn new() -> Self {
        Self {
            fd: libc::STDIN_FILENO,
        }
    }
}

impl Default for StdinTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal for StdinTerminal {
    fn is_terminal(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn size(&self) -> io::Result<PtySize> {
        // SAFETY: winsize is plain data; TIOCGWINSZ only writes into it.
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        if unsafe { libc::ioctl(self.fd, libc::TIOCGWINSZ, &mut ws) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(PtySize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        })
    }

    fn make_raw(&self) -> io::Result<SavedMode> {
        // SAFETY: termios is plain data filled in by tcgetattr before use.
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(self.fd, &mut original) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut raw = original;
        // SAFETY: `raw` is an initialized termios owned by this frame.
        unsafe { libc::cfmakeraw(&mut raw) };
        // SAFETY: `raw` outlives the call; tcsetattr only reads it.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(SavedMode(Some(original)))
    }

    fn restore(&self, mode: &SavedMode) -> io::Result<()> {
        let Some(termios) = mode.0.as_ref() else {
            return Ok(());
        };
        // SAFETY: `termios` was captured by tcgetattr and is only read.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
