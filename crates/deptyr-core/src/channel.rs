//! Passing an open descriptor to another process over a Unix stream socket.
//!
//! Each transfer is a single message: one byte of ordinary payload plus one
//! `SCM_RIGHTS` control message holding exactly one descriptor. The payload
//! byte is required because some platforms drop ancillary data attached to
//! an empty message.
//!
//! Sending does not give up the local descriptor. The kernel installs a new
//! descriptor in the receiver that refers to the same open file; the sender
//! still holds its own copy and decides when to close it.

use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::fdio::{cvt_size, retry};

/// Ordinary payload that carries the control message.
pub const PAYLOAD: u8 = b' ';

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

/// Control-message storage for exactly one descriptor.
///
/// Backed by `u64` words so the buffer meets `cmsghdr` alignment.
struct ControlBuffer {
    words: Vec<u64>,
    len: usize,
}

impl ControlBuffer {
    fn for_one_fd() -> Self {
        // SAFETY: CMSG_SPACE only computes a size.
        let len = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as libc::c_uint) } as usize;
        Self {
            words: vec![0; len.div_ceil(mem::size_of::<u64>())],
            len,
        }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.words.as_mut_ptr().cast()
    }
}

/// Send `fd` to the peer of `socket`.
///
/// `fd` is only borrowed: it stays open here after the call.
pub fn send_fd(socket: &UnixStream, fd: BorrowedFd<'_>) -> Result<(), ChannelError> {
    let payload = [PAYLOAD];
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };
    let mut control = ControlBuffer::for_one_fd();

    // SAFETY: msghdr is plain data; zeroed is a valid empty header and
    // covers platform padding fields.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr();
    msg.msg_controllen = control.len as _;

    // SAFETY: the control buffer is CMSG_SPACE(sizeof fd) bytes, so the first
    // header and its data area lie inside it.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as libc::c_uint) as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd.as_raw_fd());
    }

    // SAFETY: every pointer in msg refers to a live local above.
    let sent = retry(|| cvt_size(unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, SEND_FLAGS) }))?;
    debug!(fd = fd.as_raw_fd(), bytes = sent, "sent descriptor");
    Ok(())
}

/// Receive one descriptor sent with [`send_fd`].
///
/// The returned descriptor is new in this process and owned by the caller.
pub fn recv_fd(socket: &UnixStream) -> Result<OwnedFd, ChannelError> {
    let mut payload = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr().cast(),
        iov_len: payload.len(),
    };
    let mut control = ControlBuffer::for_one_fd();

    // SAFETY: see send_fd.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    let received = retry(|| {
        msg.msg_control = control.as_mut_ptr();
        msg.msg_controllen = control.len as _;
        msg.msg_flags = 0;
        // SAFETY: msg points at the live payload and control buffers.
        cvt_size(unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, RECV_FLAGS) })
    })?;

    if received == 0 {
        return Err(ChannelError::PeerClosed);
    }

    let mut fds = take_rights(&msg);
    if fds.is_empty() {
        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            return Err(ChannelError::Truncated);
        }
        return Err(ChannelError::NoDescriptor);
    }
    if fds.len() > 1 {
        warn!(count = fds.len(), "peer sent extra descriptors, closing them");
    }
    let fd = fds.swap_remove(0);
    debug!(fd = fd.as_raw_fd(), "received descriptor");
    Ok(fd)
}

/// Collect every `SCM_RIGHTS` descriptor in `msg`, taking ownership of each.
fn take_rights(msg: &libc::msghdr) -> Vec<OwnedFd> {
    let mut fds = Vec::new();
    // SAFETY: msg was filled in by recvmsg; the CMSG_* walkers stay inside
    // msg_controllen, and each SCM_RIGHTS entry holds fds the kernel just
    // installed in this process, so adopting them is sound.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let header = libc::CMSG_LEN(0) as usize;
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header) / mem::size_of::<RawFd>();
                for i in 0..count {
                    let raw = std::ptr::read_unaligned(data.cast::<RawFd>().add(i));
                    fds.push(OwnedFd::from_raw_fd(raw));
                }
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    fds
}
