//! Mirroring the real terminal's window size onto a pty.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};

use tracing::{debug, warn};

use crate::fdio::cvt;

/// Window geometry in character cells and pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Geometry {
    /// Pushed when the real terminal's size cannot be read. Some programs
    /// misbehave on a 0x0 pty, so it never stays unset.
    pub const FALLBACK: Geometry = Geometry {
        rows: 30,
        cols: 80,
        pixel_width: 640,
        pixel_height: 480,
    };

    /// Read the window size of the terminal on `fd`.
    pub fn read(fd: BorrowedFd<'_>) -> io::Result<Self> {
        // SAFETY: winsize is plain data filled in by TIOCGWINSZ.
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        cvt(unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) })?;
        Ok(ws.into())
    }

    /// Set the window size of the terminal on `fd`.
    pub fn apply(&self, fd: BorrowedFd<'_>) -> io::Result<()> {
        let ws = libc::winsize::from(*self);
        // SAFETY: ws is a valid winsize that outlives the call.
        cvt(unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &ws) }).map(drop)
    }
}

impl From<libc::winsize> for Geometry {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

impl From<Geometry> for libc::winsize {
    fn from(g: Geometry) -> Self {
        libc::winsize {
            ws_row: g.rows,
            ws_col: g.cols,
            ws_xpixel: g.pixel_width,
            ws_ypixel: g.pixel_height,
        }
    }
}

/// Copy the geometry of `source` onto `pty`.
///
/// Falls back to [`Geometry::FALLBACK`] when `source` has no readable size
/// (e.g. it is not a terminal). Returns the geometry that was pushed.
pub fn propagate(source: BorrowedFd<'_>, pty: BorrowedFd<'_>) -> Geometry {
    let geometry = match Geometry::read(source) {
        Ok(g) => g,
        Err(e) => {
            debug!("No terminal size available ({}), using fallback", e);
            Geometry::FALLBACK
        }
    };

    if let Err(e) = geometry.apply(pty) {
        warn!("Cannot set terminal size: {}", e);
    }
    geometry
}
