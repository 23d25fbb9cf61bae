//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::ChannelConfig;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    endpoint_url: String,
    developer_mode: bool,
    max_telemetries_in_batch: usize,
    flush_interval_ms: u64,
    storage_directory: String,
    max_transmission_storage_capacity: u64,
    throttling_enabled: bool,
    max_instant_retries: u32,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    endpoint_url: config.network.endpoint_url.clone(),
                    developer_mode: config.developer_mode,
                    max_telemetries_in_batch: config.buffer.max_telemetries_in_batch,
                    flush_interval_ms: config.buffer.flush_interval_ms,
                    storage_directory: config.storage.resolved_directory().display().to_string(),
                    max_transmission_storage_capacity: config
                        .storage
                        .max_transmission_storage_capacity,
                    throttling_enabled: config.policy.throttling_enabled,
                    max_instant_retries: config.network.max_instant_retries,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal issues worth pointing out
fn collect_warnings(config: &ChannelConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.developer_mode {
        warnings.push("developer_mode is on - every item is sent in its own request".to_string());
    }

    if config
        .network
        .endpoint_url
        .trim()
        .to_ascii_lowercase()
        .starts_with("http://")
    {
        warnings.push("endpoint uses plain http - telemetry is sent unencrypted".to_string());
    }

    if config.storage.directory.is_none() {
        warnings.push(format!(
            "storage.directory not set - using {}",
            config.storage.resolved_directory().display()
        ));
    }

    if !config.policy.throttling_enabled {
        warnings.push(
            "throttling disabled - throttling and quota responses will not pause sending"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Endpoint: {}", summary.endpoint_url);
            println!("  Developer mode: {}", summary.developer_mode);
            println!("  Batch size: {}", summary.max_telemetries_in_batch);
            println!("  Flush interval: {} ms", summary.flush_interval_ms);
            println!(
                "  Storage: {} ({} bytes)",
                summary.storage_directory, summary.max_transmission_storage_capacity
            );
            println!("  Throttling: {}", summary.throttling_enabled);
            println!("  Instant retries: {}", summary.max_instant_retries);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
