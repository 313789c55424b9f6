//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

/// Hand a program's pseudo-terminal over to another terminal.
///
/// Start a head in the terminal you want to use, then launch programs
/// anywhere with `-s`: each one gets a fresh pty that the head proxies to its
/// own terminal, one session at a time.
#[derive(Debug, Parser)]
#[command(
    name = "deptyr",
    disable_version_flag = true,
    after_help = "\
Examples:
  deptyr -H /tmp/deptyr.sock            # Head: wait for ptys on this terminal
  deptyr -s /tmp/deptyr.sock vim a.txt  # Client: run vim on the head's terminal"
)]
pub struct Cli {
    /// Run as head, accepting ptys on the socket at PATH
    #[arg(
        short = 'H',
        long = "head",
        visible_short_alias = 'S',
        value_name = "PATH",
        conflicts_with_all = ["socket", "command"]
    )]
    pub head: Option<PathBuf>,

    /// Run COMMAND on a new pty handed to the head at PATH
    #[arg(short = 's', long = "socket", value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Print diagnostics to stderr
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Program and arguments to run (client only)
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// What the process was asked to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Mode {
    Head(PathBuf),
    Client {
        socket: PathBuf,
        command: Vec<String>,
    },
}

impl Cli {
    /// Resolve the role, or a usage error if the flags don't name one.
    pub fn mode(self) -> Result<Mode, clap::Error> {
        match (self.head, self.socket) {
            (Some(socket), None) => Ok(Mode::Head(socket)),
            (None, Some(_)) if self.command.is_empty() => Err(Cli::command().error(
                ErrorKind::MissingRequiredArgument,
                "client mode needs a COMMAND to run",
            )),
            (None, Some(socket)) => Ok(Mode::Client {
                socket,
                command: self.command,
            }),
            _ => Err(Cli::command().error(
                ErrorKind::MissingRequiredArgument,
                "one of -H <PATH> or -s <PATH> is required",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Mode, clap::Error> {
        Cli::try_parse_from(args)?.mode()
    }

    #[test]
    fn test_head_mode() {
        assert_eq!(
            parse(&["deptyr", "-H", "/tmp/s"]).unwrap(),
            Mode::Head(PathBuf::from("/tmp/s"))
        );
    }

    #[test]
    fn test_capital_s_is_head_alias() {
        assert_eq!(
            parse(&["deptyr", "-S", "/tmp/s"]).unwrap(),
            Mode::Head(PathBuf::from("/tmp/s"))
        );
    }

    #[test]
    fn test_client_parses_hyphenated_args() {
        let mode = parse(&["deptyr", "-s", "/tmp/s", "bash", "-c", "echo hello"]).unwrap();
        assert_eq!(
            mode,
            Mode::Client {
                socket: PathBuf::from("/tmp/s"),
                command: vec!["bash".into(), "-c".into(), "echo hello".into()],
            }
        );
    }

    #[test]
    fn test_verbose_flag() {
        let cli = Cli::try_parse_from(["deptyr", "-V", "-H", "/tmp/s"]).unwrap();
        assert!(cli.verbose);
        let cli = Cli::try_parse_from(["deptyr", "-H", "/tmp/s"]).unwrap();
        assert!(!cli.verbose);
    }

    #[test]
    fn test_client_without_command_is_usage_error() {
        let err = parse(&["deptyr", "-s", "/tmp/s"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_no_mode_is_usage_error() {
        let err = parse(&["deptyr"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_head_and_client_conflict() {
        let err = parse(&["deptyr", "-H", "/tmp/a", "-s", "/tmp/b", "true"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_help_is_not_an_error_stream() {
        let err = Cli::try_parse_from(["deptyr", "-h"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
