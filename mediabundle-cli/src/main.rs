//! mediabundle CLI - Command-line interface
//!
//! This binary provides a command-line interface to the mediabundle library.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mediabundle::BundleConfig;
use tracing::debug;

use commands::Commands;
use error::CliError;
use logging::LogArgs;

/// Create, inspect, package and merge on-disk media bundles.
#[derive(Debug, Parser)]
#[command(name = "mediabundle", version, about)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    /// Configuration file (defaults to <config dir>/mediabundle/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn load_config(path: Option<&PathBuf>) -> Result<BundleConfig, CliError> {
    let config = match path {
        Some(path) => BundleConfig::load_from(path),
        None => BundleConfig::load(),
    };
    config.map_err(|e| CliError::Config(e.to_string()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log);

    let result = load_config(cli.config.as_ref()).and_then(|config| {
        debug!(?config, "Using configuration");
        commands::run(cli.command, &config)
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "mediabundle",
            "-vv",
            "--config",
            "/etc/mediabundle.ini",
            "info",
            "/srv/bundle",
        ])
        .unwrap();
        assert_eq!(cli.log.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/mediabundle.ini")));
        assert!(matches!(cli.command, Commands::Info { json: false, .. }));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["mediabundle", "-v", "-q", "info", "x"]).is_err());
    }

    #[test]
    fn test_load_missing_config_file() {
        let result = load_config(Some(&PathBuf::from("/nonexistent/mediabundle.ini")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }
}
