//! Core of deptyr: moving a pty between processes and proxying it.
//!
//! A *client* process allocates a pty and hands the master side to a *head*
//! process, which pumps bytes between its own terminal and that master.
//! This crate holds everything below the command line:
//!
//! - [`channel`]: send/receive one descriptor over a Unix stream socket
//! - [`terminal`]: capture terminal attributes, raw mode, restore
//! - [`resize`]: window geometry and copying it onto a pty
//! - [`proxy`]: the `ppoll` copy loop with `SIGWINCH` handling
//! - [`fdio`]: `EINTR`-retrying I/O over borrowed descriptors
//! - [`error`]: error types
//!
//! Unix only; the proxy loop relies on `ppoll`.

pub mod channel;
pub mod error;
pub mod fdio;
pub mod proxy;
pub mod resize;
pub mod terminal;

pub use channel::{recv_fd, send_fd};
pub use error::{ChannelError, TerminalError};
pub use proxy::{LocalTerminal, Proxy, Termination};
pub use resize::Geometry;
pub use terminal::{RawModeGuard, SavedAttributes};
