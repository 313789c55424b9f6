//! Pty allocation for the client side, using portable-pty.

use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deptyr_core::Geometry;
use portable_pty::{native_pty_system, MasterPty, PtySize, SlavePty};
use tracing::debug;

/// Terminal size in columns and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl From<Geometry> for TermSize {
    fn from(g: Geometry) -> Self {
        Self {
            cols: g.cols,
            rows: g.rows,
            pixel_width: g.pixel_width,
            pixel_height: g.pixel_height,
        }
    }
}

impl From<TermSize> for PtySize {
    fn from(size: TermSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: size.pixel_width,
            pixel_height: size.pixel_height,
        }
    }
}

impl TermSize {
    /// Size of the terminal on `fd`, or the default when it has none.
    pub fn of(fd: BorrowedFd<'_>) -> Self {
        match Geometry::read(fd) {
            Ok(g) if g.rows > 0 && g.cols > 0 => g.into(),
            _ => Self::default(),
        }
    }
}

/// A freshly opened pty whose master is about to be handed off.
///
/// The slave handle from allocation is held until [`AllocatedPty::close`].
/// While no slave is open the master reads as hung up, so it must stay open
/// until the client has reopened the slave by path (which, after `setsid`,
/// makes it the controlling terminal).
pub struct AllocatedPty {
    master: Box<dyn MasterPty + Send>,
    slave: Box<dyn SlavePty + Send>,
    slave_path: PathBuf,
}

impl AllocatedPty {
    /// Open a new pty pair sized `size`.
    pub fn open(size: TermSize) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(size.into())
            .context("Unable to allocate a new pseudo-terminal")?;

        let slave_path = pair
            .master
            .tty_name()
            .context("Unable to find the name of the new pseudo-terminal")?;
        debug!("Allocated pty {:?} ({}x{})", slave_path, size.cols, size.rows);

        Ok(Self {
            master: pair.master,
            slave: pair.slave,
            slave_path,
        })
    }

    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// The master descriptor, borrowed for sending.
    pub fn master_fd(&self) -> Result<BorrowedFd<'_>> {
        let raw = self
            .master
            .as_raw_fd()
            .context("Pseudo-terminal master has no file descriptor")?;
        // SAFETY: the fd belongs to `self.master`, which outlives the borrow.
        Ok(unsafe { BorrowedFd::borrow_raw(raw) })
    }

    /// Close the local copies of both ends.
    pub fn close(self) {
        debug!("Closing local pty handles");
        drop(self.slave);
        drop(self.master);
    }
}
