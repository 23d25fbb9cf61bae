//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Telemetry Channel - batch, send and persist telemetry items
#[derive(Parser, Debug)]
#[command(
    name = "telemetry-channel",
    author,
    version,
    about = "Client-side telemetry transmission channel",
    long_about = "Batches telemetry items, sends them gzip-compressed to an ingestion \n\
                  endpoint and keeps undeliverable batches on disk until they can be \n\
                  sent again."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TELEMETRY_CHANNEL_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TELEMETRY_CHANNEL_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit newline-delimited JSON telemetry items and stop the channel
    Send(SendArgs),

    /// Validate a configuration file without sending anything
    Validate(ValidateArgs),

    /// Show pending transmissions in the storage directory
    Status(StatusArgs),
}

/// Configuration source shared by `send` and `status`
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "TELEMETRY_CHANNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the ingestion endpoint
    #[arg(long, env = "TELEMETRY_CHANNEL_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Override the storage directory
    #[arg(long, env = "TELEMETRY_CHANNEL_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}

/// Arguments for the `send` command
#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Input file with one JSON telemetry item per line (stdin when omitted)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Deadline for flushing and stopping the channel, in seconds
    #[arg(long, default_value = "10", env = "TELEMETRY_CHANNEL_TIMEOUT")]
    pub timeout_secs: u64,

    /// Send every item on its own, immediately
    #[arg(long)]
    pub developer_mode: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "TELEMETRY_CHANNEL_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "channel.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `status` command
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_with_overrides() {
        let cli = Cli::try_parse_from([
            "telemetry-channel",
            "send",
            "--config",
            "channel.toml",
            "--endpoint",
            "http://localhost:8080/v2/track",
            "--timeout-secs",
            "3",
            "--developer-mode",
        ])
        .unwrap();

        let Commands::Send(args) = cli.command else {
            panic!("expected send command");
        };
        assert_eq!(args.config.config, Some(PathBuf::from("channel.toml")));
        assert_eq!(
            args.config.endpoint.as_deref(),
            Some("http://localhost:8080/v2/track")
        );
        assert_eq!(args.timeout_secs, 3);
        assert!(args.developer_mode);
    }

    #[test]
    fn test_parse_status_json() {
        let cli = Cli::try_parse_from([
            "telemetry-channel",
            "status",
            "--storage-dir",
            "/tmp/trn",
            "--format",
            "json",
        ])
        .unwrap();

        let Commands::Status(args) = cli.command else {
            panic!("expected status command");
        };
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.config.storage_dir, Some(PathBuf::from("/tmp/trn")));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["telemetry-channel", "-q", "-v", "status"]);
        assert!(result.is_err());
    }
}
