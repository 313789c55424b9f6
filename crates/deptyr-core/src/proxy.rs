//! The byte pump between a local terminal and a pty master.
//!
//! One thread, one `ppoll` per iteration. `SIGWINCH` stays blocked except
//! while `ppoll` is waiting, so a resize that lands just before the wait
//! still wakes it instead of sitting unnoticed until the next keystroke.
//! The signal handler only sets a flag; the geometry work happens here in
//! the loop.

use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::SIGWINCH;
use signal_hook::SigId;
use tracing::{debug, warn};

use crate::fdio::FdIo;
use crate::resize;

/// Largest chunk moved per read.
pub const BUFFER_SIZE: usize = 4096;

/// Why a proxy session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The local input hit EOF or a read error.
    InputClosed,
    /// The pty returned EOF or an error: the program on the slave side is
    /// gone. This is the normal end of a session.
    PtyClosed,
    /// Writing to one side failed for a reason other than a signal.
    WriteFailed,
    /// The readiness wait itself failed.
    WaitFailed,
}

/// The local side of a session: where keystrokes come from and where pty
/// output goes.
#[derive(Debug, Clone, Copy)]
pub struct LocalTerminal<'fd> {
    pub input: BorrowedFd<'fd>,
    pub output: BorrowedFd<'fd>,
}

impl LocalTerminal<'static> {
    /// The process's own stdin and stdout.
    pub fn stdio() -> Self {
        // SAFETY: fds 0 and 1 are open for the life of the process; nothing
        // in this crate closes them.
        unsafe {
            Self {
                input: BorrowedFd::borrow_raw(libc::STDIN_FILENO),
                output: BorrowedFd::borrow_raw(libc::STDOUT_FILENO),
            }
        }
    }
}

/// Bidirectional copy loop for one session.
pub struct Proxy<'fd> {
    local: LocalTerminal<'fd>,
    pty: BorrowedFd<'fd>,
    geometry_source: BorrowedFd<'fd>,
    resized: Arc<AtomicBool>,
}

impl<'fd> Proxy<'fd> {
    pub fn new(local: LocalTerminal<'fd>, pty: BorrowedFd<'fd>) -> Self {
        Self {
            local,
            pty,
            geometry_source: local.input,
            resized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read the window size from `fd` instead of the local input.
    #[cfg(test)]
    fn with_geometry_source(mut self, fd: BorrowedFd<'fd>) -> Self {
        self.geometry_source = fd;
        self
    }

    /// Clear the resize flag and report whether it was set.
    ///
    /// Any number of signals between two calls collapse into one `true`.
    pub fn take_resize(&self) -> bool {
        self.resized.swap(false, Ordering::SeqCst)
    }

    fn propagate(&self) {
        let geometry = resize::propagate(self.geometry_source, self.pty);
        debug!(rows = geometry.rows, cols = geometry.cols, "pushed window size");
    }

    /// Pump bytes until either side closes.
    pub fn run(&self) -> Termination {
        let winch = WinchScope::enter(&self.resized);
        self.propagate();
        self.pump(&winch)
    }

    fn pump(&self, winch: &WinchScope) -> Termination {
        let mut buf = [0u8; BUFFER_SIZE];
        let mut pty_io = FdIo::new(self.pty);

        loop {
            if self.take_resize() {
                self.propagate();
            }

            let mut fds = [
                poll_in(self.local.input.as_raw_fd()),
                poll_in(self.pty.as_raw_fd()),
            ];
            match winch.wait(&mut fds) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("ppoll: {}", e);
                    return Termination::WaitFailed;
                }
            }

            if fds[0].revents != 0 {
                let n = match FdIo::new(self.local.input).read(&mut buf) {
                    Ok(0) | Err(_) => return Termination::InputClosed,
                    Ok(n) => n,
                };
                if pty_io.write_all(&buf[..n]).is_err() {
                    return Termination::WriteFailed;
                }
            }

            if fds[1].revents != 0 {
                let n = match pty_io.read(&mut buf) {
                    Ok(0) | Err(_) => return Termination::PtyClosed,
                    Ok(n) => n,
                };
                if FdIo::new(self.local.output).write_all(&buf[..n]).is_err() {
                    return Termination::WriteFailed;
                }
            }
        }
    }
}

fn poll_in(fd: libc::c_int) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// `SIGWINCH` wiring for the lifetime of one session.
///
/// On entry the flag handler is registered and the signal blocked; `wait`
/// unblocks it only for the duration of `ppoll`. On drop the handler is
/// removed and the previous mask put back.
struct WinchScope {
    id: Option<SigId>,
    previous_mask: Option<libc::sigset_t>,
    wait_mask: libc::sigset_t,
}

impl WinchScope {
    fn enter(flag: &Arc<AtomicBool>) -> Self {
        let id = match signal_hook::flag::register(SIGWINCH, Arc::clone(flag)) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Unable to watch for terminal resizes: {}", e);
                None
            }
        };

        // SAFETY: sigset_t is plain data initialised by sigemptyset before
        // use; pthread_sigmask only touches the calling thread.
        unsafe {
            let mut winch: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut winch);
            libc::sigaddset(&mut winch, SIGWINCH);

            let mut previous: libc::sigset_t = mem::zeroed();
            let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &winch, &mut previous);
            if rc != 0 {
                warn!(
                    "Unable to block SIGWINCH: {}",
                    io::Error::from_raw_os_error(rc)
                );
                let mut wait_mask: libc::sigset_t = mem::zeroed();
                libc::sigemptyset(&mut wait_mask);
                return Self {
                    id,
                    previous_mask: None,
                    wait_mask,
                };
            }

            let mut wait_mask = previous;
            libc::sigdelset(&mut wait_mask, SIGWINCH);
            Self {
                id,
                previous_mask: Some(previous),
                wait_mask,
            }
        }
    }

    /// Block until a descriptor in `fds` is ready or a signal arrives.
    fn wait(&self, fds: &mut [libc::pollfd]) -> io::Result<usize> {
        // SAFETY: fds is a valid slice of pollfd and wait_mask a valid set.
        let ready = unsafe {
            libc::ppoll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                std::ptr::null(),
                &self.wait_mask,
            )
        };
        if ready < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ready as usize)
        }
    }
}

impl Drop for WinchScope {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            signal_hook::low_level::unregister(id);
        }
        if let Some(previous) = self.previous_mask.take() {
            // SAFETY: restores a mask previously returned by pthread_sigmask.
            unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &previous, std::ptr::null_mut()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use portable_pty::{native_pty_system, PtyPair, PtySize};

    use crate::resize::Geometry;
    use crate::terminal::capture_and_enter_raw;

    fn master_fd(pair: &PtyPair) -> BorrowedFd<'_> {
        let raw = pair.master.as_raw_fd().expect("master fd");
        // SAFETY: the master stays open for as long as `pair` is borrowed.
        unsafe { BorrowedFd::borrow_raw(raw) }
    }

    /// A pty whose slave is open and in raw mode, so bytes pass unchanged.
    fn raw_pty() -> (PtyPair, File) {
        let pair = native_pty_system().openpty(PtySize::default()).unwrap();
        let path = pair.master.tty_name().expect("tty name");
        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .unwrap();
        // Dropping the snapshot leaves the slave raw.
        let _ = capture_and_enter_raw(slave.as_fd()).unwrap();
        (pair, slave)
    }

    fn read_exactly(stream: &mut impl Read, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_bytes_flow_both_ways_in_order() {
        let (pair, mut slave) = raw_pty();
        let (input, mut keyboard) = UnixStream::pair().unwrap();
        let (output, mut screen) = UnixStream::pair().unwrap();

        let local = LocalTerminal {
            input: input.as_fd(),
            output: output.as_fd(),
        };
        let pty = master_fd(&pair);

        let termination = thread::scope(|s| {
            let proxy = s.spawn(move || Proxy::new(local, pty).run());

            let typed = b"typed \x03 bytes\r";
            keyboard.write_all(typed).unwrap();
            assert_eq!(read_exactly(&mut slave, typed.len()), typed);

            slave.write_all(b"hello\n").unwrap();
            assert_eq!(read_exactly(&mut screen, 6), b"hello\n");

            let big: Vec<u8> = (0..3 * BUFFER_SIZE).map(|i| (i % 251) as u8).collect();
            slave.write_all(&big).unwrap();
            assert_eq!(read_exactly(&mut screen, big.len()), big);

            drop(keyboard);
            proxy.join().unwrap()
        });

        assert_eq!(termination, Termination::InputClosed);
    }

    #[test]
    fn test_pty_hangup_ends_session() {
        let (pair, slave) = raw_pty();
        let (input, _keyboard) = UnixStream::pair().unwrap();
        let (output, _screen) = UnixStream::pair().unwrap();

        // With every slave handle closed the master reads EOF/EIO.
        drop(slave);
        drop(pair.slave);
        let master = pair.master;
        let raw = master.as_raw_fd().unwrap();
        // SAFETY: `master` outlives the proxy below.
        let pty = unsafe { BorrowedFd::borrow_raw(raw) };

        let local = LocalTerminal {
            input: input.as_fd(),
            output: output.as_fd(),
        };
        assert_eq!(Proxy::new(local, pty).run(), Termination::PtyClosed);
        drop(master);
    }

    #[test]
    fn test_session_start_pushes_fallback_geometry() {
        let (pair, _slave) = raw_pty();
        let (input, keyboard) = UnixStream::pair().unwrap();
        let (output, _screen) = UnixStream::pair().unwrap();
        drop(keyboard);

        let local = LocalTerminal {
            input: input.as_fd(),
            output: output.as_fd(),
        };
        assert_eq!(
            Proxy::new(local, master_fd(&pair)).run(),
            Termination::InputClosed
        );
        assert_eq!(Geometry::read(master_fd(&pair)).unwrap(), Geometry::FALLBACK);
    }

    #[test]
    fn test_geometry_comes_from_the_configured_source() {
        let (pair, _slave) = raw_pty();
        let source = native_pty_system()
            .openpty(PtySize {
                rows: 40,
                cols: 100,
                pixel_width: 0,
                pixel_height: 0,
            })
            .unwrap();
        let (input, keyboard) = UnixStream::pair().unwrap();
        let (output, _screen) = UnixStream::pair().unwrap();
        drop(keyboard);

        let local = LocalTerminal {
            input: input.as_fd(),
            output: output.as_fd(),
        };
        Proxy::new(local, master_fd(&pair))
            .with_geometry_source(master_fd(&source))
            .run();

        let size = Geometry::read(master_fd(&pair)).unwrap();
        assert_eq!((size.rows, size.cols), (40, 100));
    }

    #[test]
    fn test_resize_during_session_reaches_pty() {
        let (pair, _slave) = raw_pty();
        let source = native_pty_system()
            .openpty(PtySize {
                rows: 40,
                cols: 100,
                pixel_width: 0,
                pixel_height: 0,
            })
            .unwrap();
        let (input, keyboard) = UnixStream::pair().unwrap();
        let (output, _screen) = UnixStream::pair().unwrap();

        let local = LocalTerminal {
            input: input.as_fd(),
            output: output.as_fd(),
        };
        let pty = master_fd(&pair);
        let source_fd = master_fd(&source);

        let wait_for = |rows: u16, cols: u16| {
            for _ in 0..200 {
                let g = Geometry::read(pty).unwrap();
                if (g.rows, g.cols) == (rows, cols) {
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
            panic!("pty never reached {rows}x{cols}");
        };

        let termination = thread::scope(|s| {
            let (tid_tx, tid_rx) = mpsc::channel();
            let proxy = s.spawn(move || {
                // SAFETY: pthread_self has no preconditions.
                tid_tx.send(unsafe { libc::pthread_self() }).unwrap();
                Proxy::new(local, pty).with_geometry_source(source_fd).run()
            });
            let tid = tid_rx.recv().unwrap();

            // Session start pushed the initial size, so the handler is in place.
            wait_for(40, 100);

            source
                .master
                .resize(PtySize {
                    rows: 50,
                    cols: 132,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .unwrap();
            // SAFETY: the proxy thread is alive until `keyboard` is dropped.
            assert_eq!(unsafe { libc::pthread_kill(tid, SIGWINCH) }, 0);
            wait_for(50, 132);

            drop(keyboard);
            proxy.join().unwrap()
        });

        assert_eq!(termination, Termination::InputClosed);
    }

    #[test]
    fn test_resize_signals_coalesce() {
        let (pair, _slave) = raw_pty();
        let (input, _keyboard) = UnixStream::pair().unwrap();
        let (output, _screen) = UnixStream::pair().unwrap();
        let local = LocalTerminal {
            input: input.as_fd(),
            output: output.as_fd(),
        };
        let proxy = Proxy::new(local, master_fd(&pair));

        let winch = WinchScope::enter(&proxy.resized);
        // Blocked, so both stay pending and merge into one delivery.
        // SAFETY: raise only targets this thread.
        unsafe {
            libc::raise(SIGWINCH);
            libc::raise(SIGWINCH);
        }
        assert!(!proxy.take_resize());

        // Nothing is readable: only the unblocked signal can end the wait.
        let mut fds = [poll_in(input.as_raw_fd())];
        let err = winch.wait(&mut fds).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);

        assert!(proxy.take_resize());
        assert!(!proxy.take_resize());
        drop(winch);
    }
}
