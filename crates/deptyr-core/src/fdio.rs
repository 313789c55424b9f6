//! Thin blocking I/O over borrowed descriptors.
//!
//! Everything here treats `EINTR` as "try again": a signal landing in the
//! middle of a call is never reported to the caller.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};

/// Run `f` until it returns something other than `ErrorKind::Interrupted`.
pub fn retry<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Convert a libc `-1 and errno` return into an `io::Result`.
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

pub(crate) fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// `Read`/`Write` over a descriptor this type does not own.
///
/// `write_all` from `std::io::Write` already loops over partial writes and
/// `Interrupted`, which is exactly the flush discipline the proxy needs.
#[derive(Debug, Clone, Copy)]
pub struct FdIo<'fd>(BorrowedFd<'fd>);

impl<'fd> FdIo<'fd> {
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self(fd)
    }
}

impl Read for FdIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: the buffer is valid for `buf.len()` bytes and the fd is
        // kept open by the borrow.
        cvt_size(unsafe {
            libc::read(
                self.0.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        })
    }
}

impl Write for FdIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: as above, for a readable buffer.
        cvt_size(unsafe {
            libc::write(
                self.0.as_raw_fd(),
                buf.as_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Close `fd` and report the result, which dropping an `OwnedFd` discards.
pub fn close(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: `raw` came from an OwnedFd we just gave up, so nothing else
    // will close it. EINTR is not retried: on Linux the fd is already gone.
    cvt(unsafe { libc::close(raw) }).map(drop)
}
