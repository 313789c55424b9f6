//! Saving, switching and restoring terminal attributes.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};

use tracing::{debug, warn};

use crate::error::TerminalError;
use crate::fdio::{cvt, retry};

/// Attributes captured from a terminal before it was put into raw mode.
///
/// Empty when the descriptor was not a readable terminal; restoring an empty
/// snapshot does nothing.
pub struct SavedAttributes<'fd> {
    fd: BorrowedFd<'fd>,
    termios: Option<libc::termios>,
}

impl<'fd> SavedAttributes<'fd> {
    /// Whether attributes were actually captured.
    pub fn is_captured(&self) -> bool {
        self.termios.is_some()
    }

    /// Put the captured attributes back, retrying when a signal interrupts.
    pub fn restore(&self) -> Result<(), TerminalError> {
        let Some(termios) = self.termios.as_ref() else {
            return Ok(());
        };
        retry(|| set_attributes(self.fd, termios)).map_err(TerminalError::Restore)
    }
}

impl std::fmt::Debug for SavedAttributes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedAttributes")
            .field("fd", &self.fd.as_raw_fd())
            .field("captured", &self.is_captured())
            .finish()
    }
}

/// Read the attributes of the terminal on `fd`.
pub fn get_attributes(fd: BorrowedFd<'_>) -> io::Result<libc::termios> {
    // SAFETY: termios is plain data and tcgetattr fills all of it.
    let mut termios: libc::termios = unsafe { mem::zeroed() };
    cvt(unsafe { libc::tcgetattr(fd.as_raw_fd(), &mut termios) })?;
    Ok(termios)
}

fn set_attributes(fd: BorrowedFd<'_>, termios: &libc::termios) -> io::Result<()> {
    // SAFETY: termios is a fully initialised value from tcgetattr.
    cvt(unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, termios) }).map(drop)
}

/// Snapshot the terminal on `fd` and switch it to raw mode.
///
/// A descriptor that is not a terminal is left alone: the snapshot comes
/// back empty and the caller carries on without raw mode.
pub fn capture_and_enter_raw(fd: BorrowedFd<'_>) -> Result<SavedAttributes<'_>, TerminalError> {
    let saved = match get_attributes(fd) {
        Ok(termios) => termios,
        Err(e) => {
            warn!("Unable to read terminal attributes: {}", e);
            return Ok(SavedAttributes { fd, termios: None });
        }
    };

    let mut raw = saved;
    // SAFETY: raw is a valid termios copied from the terminal.
    unsafe { libc::cfmakeraw(&mut raw) };
    retry(|| set_attributes(fd, &raw)).map_err(TerminalError::EnterRaw)?;
    debug!(fd = fd.as_raw_fd(), "terminal switched to raw mode");

    Ok(SavedAttributes {
        fd,
        termios: Some(saved),
    })
}

/// Raw mode for as long as the guard lives.
///
/// Call [`RawModeGuard::restore`] to restore and see the result. Dropping the
/// guard without it still restores, but can only log a failure.
pub struct RawModeGuard<'fd> {
    saved: Option<SavedAttributes<'fd>>,
}

impl<'fd> RawModeGuard<'fd> {
    pub fn enter(fd: BorrowedFd<'fd>) -> Result<Self, TerminalError> {
        Ok(Self {
            saved: Some(capture_and_enter_raw(fd)?),
        })
    }

    pub fn is_raw(&self) -> bool {
        self.saved.as_ref().is_some_and(SavedAttributes::is_captured)
    }

    pub fn restore(mut self) -> Result<(), TerminalError> {
        match self.saved.take() {
            Some(saved) => saved.restore(),
            None => Ok(()),
        }
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = saved.restore() {
                warn!("{}", e);
            }
        }
    }
}
