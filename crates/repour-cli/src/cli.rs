//! Command-line arguments for `repour`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "repour",
    version,
    about = "Run build-alignment adjust tasks against a source checkout.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the configuration file (TOML).
    ///
    /// Falls back to `REPOUR_CONFIG`, then to built-in defaults.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `REPOUR_LOG` or `info` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one adjust request and print its outcome as JSON.
    Adjust {
        /// JSON file holding the adjust request.
        #[arg(long, value_name = "FILE")]
        request: PathBuf,

        /// Skip delivery to the request's callback destination.
        #[arg(long)]
        no_callback: bool,

        /// Seconds to wait for the task to settle after Ctrl-C.
        #[arg(long, value_name = "SECS", default_value_t = 30)]
        shutdown_timeout: u64,
    },
    /// Load and validate the configuration, then list the registered strategies.
    Strategies,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{CliArgs, Command};

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let args = CliArgs::try_parse_from([
            "repour",
            "adjust",
            "--request",
            "req.json",
            "--log-level",
            "debug",
            "--config",
            "repour.toml",
        ])
        .unwrap();

        assert!(args.log_level.is_some());
        assert_eq!(args.config.unwrap().to_str(), Some("repour.toml"));
        match args.command {
            Command::Adjust {
                request,
                no_callback,
                shutdown_timeout,
            } => {
                assert_eq!(request.to_str(), Some("req.json"));
                assert!(!no_callback);
                assert_eq!(shutdown_timeout, 30);
            }
            Command::Strategies => panic!("expected adjust"),
        }
    }

    #[test]
    fn adjust_requires_a_request_file() {
        assert!(CliArgs::try_parse_from(["repour", "adjust"]).is_err());
    }
}
