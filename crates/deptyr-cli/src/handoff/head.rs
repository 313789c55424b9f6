//! Head mode: accept pty masters and proxy them to this terminal, one at a time.

use std::convert::Infallible;
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use anyhow::{Context, Result};
use deptyr_core::{fdio, recv_fd, LocalTerminal, Proxy, RawModeGuard, Termination};
use tracing::{debug, info, warn};

use crate::handoff::endpoint::Endpoint;
use crate::handoff::notify;

/// A head bound to its rendezvous socket.
pub struct Head<'fd> {
    endpoint: Endpoint,
    terminal: LocalTerminal<'fd>,
}

impl Head<'static> {
    /// Bind `socket` and proxy to this process's own stdin/stdout.
    pub fn bind(socket: &Path) -> Result<Self> {
        Ok(Self::new(Endpoint::bind(socket)?, LocalTerminal::stdio()))
    }
}

impl<'fd> Head<'fd> {
    pub fn new(endpoint: Endpoint, terminal: LocalTerminal<'fd>) -> Self {
        Self { endpoint, terminal }
    }

    /// Serve clients until something fatal happens.
    ///
    /// A failed `accept` ends the head; there is no retry.
    pub fn run(&self) -> Result<Infallible> {
        notify::ready(self.endpoint.path());
        loop {
            self.serve_one()?;
        }
    }

    /// Accept one client and proxy its pty until the session ends.
    ///
    /// The terminal mode is restored however the proxy stopped, before the
    /// pty is closed.
    pub fn serve_one(&self) -> Result<Termination> {
        let connection = self.endpoint.accept().context("accept")?;
        let pty = recv_fd(&connection)
            .inspect_err(|e| {
                if e.is_missing_descriptor() {
                    warn!("Client connected but sent no pty");
                }
            })
            .context("Oof, didn't get a child FD")?;
        fdio::close(OwnedFd::from(connection)).context("close")?;
        info!("Attached a new pty");

        let termination = self.proxy(&pty)?;

        drop(pty);
        Ok(termination)
    }

    fn proxy(&self, pty: &OwnedFd) -> Result<Termination> {
        let raw_mode = RawModeGuard::enter(self.terminal.input)?;
        if !raw_mode.is_raw() {
            debug!("Local input is not a terminal, passing bytes through as-is");
        }
        let termination = Proxy::new(self.terminal, pty.as_fd()).run();
        raw_mode.restore().context("Unable to tcsetattr")?;

        // The terminal may be gone after a failed write; stay quiet then.
        if termination != Termination::WriteFailed {
            debug!("Session ended: {:?}", termination);
        }
        Ok(termination)
    }
}
