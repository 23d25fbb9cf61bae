//! `status` command implementation.

use anyhow::{Context, Result};
use transmission::{FileSystemOutput, StorageStatus};

use super::load_config;
use crate::cli::{OutputFormat, StatusArgs};

/// Execute the `status` command
pub fn run_status(args: &StatusArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let directory = config.storage.resolved_directory();
    let capacity = config.storage.max_transmission_storage_capacity;

    let status = if directory.exists() {
        FileSystemOutput::inspect(directory.clone(), capacity)
            .with_context(|| format!("Failed to read storage directory {}", directory.display()))?
    } else {
        StorageStatus {
            directory,
            capacity_bytes: capacity,
            ..Default::default()
        }
    };

    match args.format {
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
            println!("{}", json);
        }
        OutputFormat::Text => print!("{}", render_status(&status)),
    }

    Ok(())
}

fn render_status(status: &StorageStatus) -> String {
    let usage = if status.capacity_bytes > 0 {
        status.pending_bytes as f64 / status.capacity_bytes as f64 * 100.0
    } else {
        0.0
    };

    let mut out = String::new();
    out.push_str(&format!("Storage: {}\n", status.directory.display()));
    out.push_str(&format!("  Pending transmissions: {}\n", status.pending_files));
    out.push_str(&format!(
        "  Pending bytes: {} / {} ({:.1}%)\n",
        status.pending_bytes, status.capacity_bytes, usage
    ));
    if status.in_flight_files > 0 {
        out.push_str(&format!(
            "  Claimed (in flight or left by a crash): {}\n",
            status.in_flight_files
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_status() {
        let status = StorageStatus {
            directory: PathBuf::from("/tmp/transmissions"),
            pending_files: 3,
            pending_bytes: 512,
            in_flight_files: 1,
            capacity_bytes: 1024,
        };

        let text = render_status(&status);
        assert!(text.contains("Pending transmissions: 3"));
        assert!(text.contains("512 / 1024 (50.0%)"));
        assert!(text.contains("Claimed"));
    }

    #[test]
    fn test_render_empty_status() {
        let text = render_status(&StorageStatus {
            directory: PathBuf::from("/tmp/none"),
            capacity_bytes: 1024,
            ..Default::default()
        });
        assert!(text.contains("Pending transmissions: 0"));
        assert!(!text.contains("Claimed"));
    }
}
