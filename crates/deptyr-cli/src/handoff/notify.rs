//! Readiness notification for service managers (`sd_notify` protocol).

use std::ffi::OsStr;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use tracing::{debug, warn};

/// Environment variable a service manager uses to pass its socket.
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

/// Tell the service manager, if any, that the head is listening on `socket`.
///
/// Called once after a successful bind. Failures are logged and ignored.
pub fn ready(socket: &Path) {
    let Some(target) = std::env::var_os(NOTIFY_SOCKET_ENV) else {
        debug!("{} not set, skipping readiness notification", NOTIFY_SOCKET_ENV);
        return;
    };

    let message = ready_message(socket);
    match send(&target, message.as_bytes()) {
        Ok(()) => debug!("Sent readiness notification to {:?}", target),
        Err(e) => warn!("Failed to notify service manager at {:?}: {}", target, e),
    }
}

fn ready_message(socket: &Path) -> String {
    format!("READY=1\nSTATUS=listening on {}", socket.display())
}

fn send(target: &OsStr, message: &[u8]) -> io::Result<()> {
    let sock = UnixDatagram::unbound()?;

    // A leading '@' names a socket in the Linux abstract namespace.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::net::SocketAddr;

        if let Some(name) = target.as_bytes().strip_prefix(b"@") {
            let addr = SocketAddr::from_abstract_name(name)?;
            sock.send_to_addr(message, &addr)?;
            return Ok(());
        }
    }

    sock.send_to(message, target)?;
    Ok(())
}
