//! deptyr entry point: head or client, chosen on the command line.

mod args;
mod handoff;

use std::convert::Infallible;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Mode};
use crate::handoff::{client, Head};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // -h prints to stdout and exits 0.
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => usage_error(e),
    };

    init_tracing(cli.verbose);

    let result = match cli.mode() {
        Ok(mode) => run(mode),
        Err(e) => usage_error(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(rust_log.as_deref(), verbose))
        .init();
}

/// `RUST_LOG` decides when set and valid, otherwise warnings only. `-V`
/// always adds debug on top.
fn log_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    let filter = rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    if verbose {
        filter.add_directive(tracing::Level::DEBUG.into())
    } else {
        filter
    }
}

fn run(mode: Mode) -> Result<Infallible> {
    match mode {
        Mode::Head(socket) => Head::bind(&socket)?.run(),
        Mode::Client { socket, command } => client::run(&socket, &command),
    }
}

fn usage_error(e: clap::Error) -> ! {
    let _ = e.print();
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_default_level_is_warn() {
        assert_eq!(log_filter(None, false).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_rust_log_sets_global_level() {
        assert_eq!(
            log_filter(Some("info"), false).max_level_hint(),
            Some(LevelFilter::INFO)
        );
        assert_eq!(
            log_filter(Some("error"), false).max_level_hint(),
            Some(LevelFilter::ERROR)
        );
    }

    #[test]
    fn test_verbose_raises_to_debug() {
        assert_eq!(log_filter(None, true).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(
            log_filter(Some("error"), true).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }
}
