//! Error types for descriptor transfer and terminal control.

use std::io;

use thiserror::Error;

/// Failure to move a descriptor across a local socket.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `sendmsg`/`recvmsg` failed, e.g. the socket is not connected.
    #[error("descriptor transfer failed: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection before a message arrived.
    #[error("peer closed the connection before sending a descriptor")]
    PeerClosed,

    /// A message arrived but carried no `SCM_RIGHTS` payload.
    #[error("message carried no file descriptor")]
    NoDescriptor,

    /// The kernel dropped part of the control data.
    #[error("ancillary data was truncated")]
    Truncated,
}

/// Failure to change or restore terminal attributes.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("unable to set terminal attributes: {0}")]
    EnterRaw(#[source] io::Error),

    #[error("unable to restore terminal attributes: {0}")]
    Restore(#[source] io::Error),
}

impl ChannelError {
    /// True when the failure means nothing was delivered rather than a broken socket.
    pub fn is_missing_descriptor(&self) -> bool {
        matches!(self, ChannelError::NoDescriptor | ChannelError::Truncated)
    }
}
