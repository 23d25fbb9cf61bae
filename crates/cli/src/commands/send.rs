//! `send` command implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use channel::TelemetryChannel;
use contracts::TelemetryItem;
use observability::TransmissionMetricsHandler;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::load_config;
use crate::cli::SendArgs;
use crate::error::{self, CliError};

#[derive(Debug, Default)]
struct SubmitStats {
    submitted: u64,
    skipped: u64,
}

/// Execute the `send` command
pub async fn run_send(args: &SendArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if args.developer_mode {
        config.developer_mode = true;
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    info!(
        endpoint = %config.network.endpoint_url,
        storage = %config.storage.resolved_directory().display(),
        developer_mode = config.developer_mode,
        "Starting telemetry channel"
    );

    let metrics = Arc::new(TransmissionMetricsHandler::new());
    let channel = TelemetryChannel::builder(config)
        .with_handler(metrics.clone())
        .build()
        .map_err(CliError::from)
        .context("Failed to start telemetry channel")?;

    let mut stats = SubmitStats::default();
    tokio::select! {
        result = submit_all(&channel, args.input.as_deref(), &mut stats) => {
            result.context("Failed to read telemetry input")?;
        }
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping channel...");
        }
    }

    let timeout = Duration::from_secs(args.timeout_secs);
    info!(
        submitted = stats.submitted,
        skipped = stats.skipped,
        timeout_secs = args.timeout_secs,
        "Input finished, stopping channel"
    );
    let drained = channel.stop(timeout).await;
    if !drained {
        warn!("Channel stopped before every batch was delivered or stored");
    }

    observability::record_policy_state(channel.policy_state());
    println!("Submitted {} items ({} skipped)", stats.submitted, stats.skipped);
    print!("{}", metrics.summary());

    if let Some(status) = channel.storage_status() {
        observability::record_storage_pending(status.pending_files, status.pending_bytes);
        println!(
            "Pending on disk: {} transmissions ({} bytes) in {}",
            status.pending_files,
            status.pending_bytes,
            status.directory.display()
        );
    }

    Ok(())
}

async fn submit_all(
    channel: &TelemetryChannel,
    input: Option<&Path>,
    stats: &mut SubmitStats,
) -> error::Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match parse_item(line_no, text) {
            Ok(item) => {
                channel.submit(item);
                stats.submitted += 1;
            }
            Err(e) => {
                warn!(error = %e, "Skipping input line");
                stats.skipped += 1;
            }
        }
    }
    Ok(())
}

fn parse_item(line: usize, text: &str) -> error::Result<TelemetryItem> {
    serde_json::from_str(text).map_err(|e| CliError::invalid_input(line, e.to_string()))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
