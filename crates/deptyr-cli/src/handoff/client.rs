//! Client mode: hand a fresh pty to a head, then become the target program on it.

use std::convert::Infallible;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use deptyr_core::{send_fd, LocalTerminal};
use tracing::{debug, info};

use crate::handoff::endpoint;
use crate::handoff::pty::{AllocatedPty, TermSize};

/// Variable telling the exec'd program which pty it runs on.
pub const PTY_ENV: &str = "REPTYR_PTY";

/// Connect to the head on `socket`, give it a new pty and exec `command` on
/// that pty. Only returns on failure.
pub fn run(socket: &Path, command: &[String]) -> Result<Infallible> {
    let Some((program, args)) = command.split_first() else {
        bail!("No command specified");
    };

    let stream = endpoint::connect(socket)?;
    let pty = AllocatedPty::open(TermSize::of(LocalTerminal::stdio().input))?;
    let slave_path = pty.slave_path().to_path_buf();

    println!("Opened a new pty: {}", slave_path.display());
    io::stdout().flush().context("flush stdout")?;

    send_fd(&stream, pty.master_fd()?).context("Unable to send the master handle")?;
    drop(stream);
    info!("Handed pty master to {:?}", socket);

    detach();
    attach_stdio(&slave_path)?;
    pty.close();

    let err = Command::new(program)
        .args(args)
        .env(PTY_ENV, &slave_path)
        .exec();
    Err(err).with_context(|| format!("execvp {} failed", program))
}

/// Leave the launching session: join the parent's process group (so we are
/// not a group leader) and then start a new session.
fn detach() {
    // SAFETY: plain syscalls on the calling process.
    unsafe {
        if libc::setpgid(0, libc::getppid()) < 0 {
            debug!("setpgid: {}", io::Error::last_os_error());
        }
        if libc::setsid() < 0 {
            debug!("setsid: {}", io::Error::last_os_error());
        }
    }
}

/// Make the pty slave our stdin, stdout and stderr.
///
/// Opening it after `setsid` also makes it the controlling terminal.
fn attach_stdio(slave: &Path) -> Result<()> {
    let input = OpenOptions::new()
        .read(true)
        .open(slave)
        .with_context(|| format!("open {:?} for reading", slave))?;
    dup_onto(input.as_raw_fd(), libc::STDIN_FILENO)?;

    let output = OpenOptions::new()
        .write(true)
        .open(slave)
        .with_context(|| format!("open {:?} for writing", slave))?;
    dup_onto(output.as_raw_fd(), libc::STDOUT_FILENO)?;
    dup_onto(output.as_raw_fd(), libc::STDERR_FILENO)?;

    // `input` and `output` close here; only the dups remain.
    Ok(())
}

fn dup_onto(fd: RawFd, target: RawFd) -> Result<()> {
    // SAFETY: dup2 on two descriptors this process holds; `target` is one of
    // the standard streams, which we mean to replace.
    if unsafe { libc::dup2(fd, target) } < 0 {
        return Err(io::Error::last_os_error()).with_context(|| format!("dup2 onto fd {}", target));
    }
    Ok(())
}
