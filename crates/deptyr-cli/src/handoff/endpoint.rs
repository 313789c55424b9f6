//! The rendezvous socket a head listens on and clients connect to.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// A bound, listening Unix socket. The socket file is removed on drop.
pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
}

impl Endpoint {
    /// Bind and listen on `path`.
    ///
    /// A leftover socket file from a head that is no longer running is
    /// replaced. A path held by a live head, or occupied by something that is
    /// not a socket, is an error.
    pub fn bind(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory for {:?}", path))?;
        }

        let listener = match UnixListener::bind(path) {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                remove_stale_socket(path)?;
                UnixListener::bind(path)
                    .with_context(|| format!("Failed to bind server socket {:?}", path))?
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to bind server socket {:?}", path));
            }
        };

        info!("Listening on {:?}", path);
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next client. `EINTR` is retried by std.
    pub fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept()?;
        debug!("Accepted connection");
        Ok(stream)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.path.exists() && std::fs::remove_file(&self.path).is_err() {
            warn!("Failed to remove socket {:?} on shutdown", self.path);
        }
    }
}

/// Connect to a head listening on `path`.
pub fn connect(path: &Path) -> Result<UnixStream> {
    UnixStream::connect(path).with_context(|| format!("Failed to connect to server at {:?}", path))
}

/// Remove a socket file nobody is listening on any more.
fn remove_stale_socket(path: &Path) -> Result<()> {
    if UnixStream::connect(path).is_ok() {
        anyhow::bail!("Another head is already listening on {:?}", path);
    }

    // Never follow a symlink here.
    let metadata = std::fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat socket path: {:?}", path))?;

    if metadata.file_type().is_symlink() {
        anyhow::bail!("Socket path {:?} is a symlink, refusing to delete it", path);
    }

    if !metadata.file_type().is_socket() {
        anyhow::bail!("Path {:?} exists but is not a socket", path);
    }

    info!("Removing stale socket {:?}", path);
    std::fs::remove_file(path)
        .with_context(|| format!("Failed to remove stale socket: {:?}", path))
}
