//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (print, watch, implementations) and their argument
//! structs. The bootstrap file and query flags have environment variable
//! equivalents for container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::error::ConfigError;
use crate::query::ConfigQuery;

#[derive(Parser)]
#[command(
    name = "reloadable-config",
    version,
    about = "Layered, hot-reloadable configuration",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        reloadable-config print -b bootstrap.yaml -a billing -e prod    Print the merged tree\n  \
        reloadable-config watch -b bootstrap.yaml -a billing            Log every change\n  \
        reloadable-config implementations                               List built-in sources"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the configuration once and print it
    Print(PrintArgs),

    /// Refresh periodically and report every change until interrupted
    Watch(WatchArgs),

    /// List the registered source and transformer implementations
    Implementations,
}

/// Which bootstrap file to use and which configuration to load.
#[derive(Args)]
pub struct QueryArgs {
    /// Bootstrap file (.yaml, .json, .toml)
    #[arg(short, long, env = "RELOADABLE_CONFIG_BOOTSTRAP")]
    pub bootstrap: PathBuf,

    /// Application name
    #[arg(short, long, env = "RELOADABLE_CONFIG_APP")]
    pub app: String,

    /// Environment, repeatable; later environments win
    #[arg(short, long = "env", value_name = "ENV")]
    pub envs: Vec<String>,

    /// Datacenter
    #[arg(long, env = "RELOADABLE_CONFIG_DATACENTER")]
    pub datacenter: Option<String>,

    /// Zone within the datacenter
    #[arg(long, env = "RELOADABLE_CONFIG_ZONE")]
    pub zone: Option<String>,

    /// Only show the value at this dotted path
    #[arg(long)]
    pub path: Option<String>,

    // -- Logging --
    /// Log level
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "warn",
        help_heading = "Logging"
    )]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long, help_heading = "Logging")]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty", help_heading = "Logging")]
    pub json: bool,
}

impl QueryArgs {
    pub fn query(&self) -> Result<ConfigQuery, ConfigError> {
        ConfigQuery::new(
            self.app.as_str(),
            &self.envs,
            self.datacenter.as_deref(),
            self.zone.as_deref(),
        )
    }
}

#[derive(Args)]
pub struct PrintArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Output format
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,
}

#[derive(Args)]
#[command(after_help = "\x1b[1mExamples:\x1b[0m\n  \
        reloadable-config watch -b bootstrap.yaml -a billing -e prod -e canary\n  \
        reloadable-config watch -b bootstrap.yaml -a billing --path db --interval-secs 5")]
pub struct WatchArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Refresh interval in seconds; defaults to the bootstrap's refresh-interval-ms
    #[arg(long, env = "RELOADABLE_CONFIG_INTERVAL_SECS")]
    pub interval_secs: Option<u64>,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// One `dotted.path = value` line per leaf
    Flat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_envs_in_order() {
        let cli = Cli::try_parse_from([
            "reloadable-config",
            "print",
            "--bootstrap",
            "b.yaml",
            "--app",
            "billing",
            "--env",
            "prod",
            "--env",
            "canary",
            "--datacenter",
            "dc1",
        ])
        .unwrap();
        let Some(Commands::Print(args)) = cli.command else {
            panic!("expected print");
        };
        let query = args.query.query().unwrap();
        assert_eq!(query.envs(), ["prod", "canary"]);
        assert_eq!(query.datacenter(), Some("dc1"));
        assert!(matches!(args.format, OutputFormat::Json));
    }

    #[test]
    fn json_and_pretty_conflict() {
        let result = Cli::try_parse_from([
            "reloadable-config",
            "watch",
            "-b",
            "b.yaml",
            "-a",
            "x",
            "--json",
            "--pretty",
        ]);
        assert!(result.is_err());
    }
}
