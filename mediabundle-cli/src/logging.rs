//! Logging setup for the CLI.
//!
//! Log records go to stderr so command output on stdout stays clean. An
//! interactive terminal gets compact human readable lines; anything else
//! (pipes, CI logs) gets one JSON object per line.

use std::io::IsTerminal;
use std::str::FromStr;

use clap::Args;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Verbosity flags shared by every subcommand.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct LogArgs {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease log verbosity (-q warnings only, -qq errors only)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, conflicts_with = "verbose")]
    pub quiet: u8,
}

/// Install the global tracing subscriber.
///
/// The returned guard flushes buffered records when dropped and must be kept
/// alive until the program exits.
pub fn init(args: LogArgs) -> WorkerGuard {
    let level = log_level(args);
    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let layer = if std::io::stderr().is_terminal() {
        fmt::layer()
            .without_time()
            .with_target(false)
            .with_writer(writer)
            .compact()
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    guard
}

/// Level selected by the flags, then `RUST_LOG`, then the default.
fn log_level(args: LogArgs) -> LevelFilter {
    match args.quiet {
        0 => (),
        1 => return LevelFilter::WARN,
        _ => return LevelFilter::ERROR,
    }

    if args.verbose == 0 {
        if let Ok(rust_log) = std::env::var(EnvFilter::DEFAULT_ENV) {
            if let Ok(level) = LevelFilter::from_str(&rust_log) {
                return level;
            }
        }
    }

    match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
