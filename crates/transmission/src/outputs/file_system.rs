//! FileSystemOutput - size-bounded on-disk store of pending transmissions
//!
//! Layout: one `<id>.trn` file per transmission, written as `<id>.tmp` and
//! renamed into place. The loader claims a file by renaming it to
//! `<id>.inflight`, so a file is never handed out twice.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bincode::Options;
use serde::Serialize;
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use contracts::{ContractError, StorageConfig, Transmission, TransmissionId, TransmissionOutput};

use crate::error::TransmissionError;

/// Extension of a transmission ready to be loaded
pub const TRANSMISSION_EXTENSION: &str = "trn";
/// Extension of a transmission being written
pub const TEMP_EXTENSION: &str = "tmp";
/// Extension of a transmission claimed by the loader
pub const IN_FLIGHT_EXTENSION: &str = "inflight";

/// Pending transmissions in the storage directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStatus {
    pub directory: PathBuf,
    pub pending_files: usize,
    pub pending_bytes: u64,
    pub in_flight_files: usize,
    pub capacity_bytes: u64,
}

#[derive(Debug)]
struct PendingFile {
    path: PathBuf,
    id: TransmissionId,
    len: u64,
    modified: SystemTime,
}

/// Output that persists transmissions for a later resend
#[derive(Debug)]
pub struct FileSystemOutput {
    name: String,
    directory: PathBuf,
    capacity: u64,
    max_send_attempts: u32,
}

impl FileSystemOutput {
    /// Open (creating if needed) the configured storage directory
    pub fn new(name: impl Into<String>, config: &StorageConfig) -> Result<Self, TransmissionError> {
        Self::open(
            name,
            config.resolved_directory(),
            config.max_transmission_storage_capacity,
            config.max_send_attempts,
        )
    }

    /// Open `directory` and recover files left by a previous run
    #[instrument(name = "file_system_output_open", skip(name, directory), fields(directory = %directory.display()))]
    pub fn open(
        name: impl Into<String>,
        directory: PathBuf,
        capacity: u64,
        max_send_attempts: u32,
    ) -> Result<Self, TransmissionError> {
        fs::create_dir_all(&directory)
            .map_err(|e| TransmissionError::storage_unavailable(&directory, e))?;

        let output = Self {
            name: name.into(),
            directory,
            capacity,
            max_send_attempts,
        };
        output.recover()?;
        Ok(output)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn path_for(&self, id: TransmissionId, extension: &str) -> PathBuf {
        self.directory.join(format!("{id}.{extension}"))
    }

    /// Put claimed files back and drop half-written ones
    fn recover(&self) -> Result<(), TransmissionError> {
        let mut restored = 0usize;
        let mut removed = 0usize;

        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            let Some(id) = parse_id(&path) else {
                continue;
            };

            match extension_of(&path) {
                Some(IN_FLIGHT_EXTENSION) => {
                    let target = self.path_for(id, TRANSMISSION_EXTENSION);
                    let result = if target.exists() {
                        fs::remove_file(&path)
                    } else {
                        fs::rename(&path, &target)
                    };
                    match result {
                        Ok(()) => restored += 1,
                        Err(e) => warn!(path = %path.display(), error = %e, "Failed to restore claimed transmission"),
                    }
                }
                Some(TEMP_EXTENSION) => match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial transmission"),
                },
                _ => {}
            }
        }

        if restored > 0 || removed > 0 {
            info!(
                directory = %self.directory.display(),
                restored,
                removed,
                "Recovered transmission storage"
            );
        }
        Ok(())
    }

    /// Files ready to load, oldest first
    fn list_pending(&self) -> std::io::Result<Vec<PendingFile>> {
        let mut pending = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if extension_of(&path) != Some(TRANSMISSION_EXTENSION) {
                continue;
            }
            let Some(id) = parse_id(&path) else {
                continue;
            };
            // The file may have been claimed or evicted since read_dir
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            pending.push(PendingFile {
                path,
                id,
                len: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        pending.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    /// Write `transmission` to disk, evicting the oldest files if needed
    #[instrument(
        name = "file_system_output_persist",
        skip(self, transmission),
        fields(output = %self.name, transmission_id = %transmission.id())
    )]
    pub fn persist(&self, transmission: &Transmission) -> Result<(), ContractError> {
        let encoded = codec()
            .serialize(transmission)
            .map_err(|e| ContractError::serialize(e.to_string()))?;
        let needed = encoded.len() as u64;

        if needed > self.capacity {
            error!(
                bytes = needed,
                capacity = self.capacity,
                "Transmission larger than storage capacity, dropped"
            );
            counter!("telemetry_channel_transmissions_dropped_total", "reason" => "too_large")
                .increment(1);
            return Err(ContractError::StorageCapacity {
                needed,
                capacity: self.capacity,
            });
        }

        self.evict_for(transmission.id(), needed)?;

        let id = transmission.id();
        let temp = self.path_for(id, TEMP_EXTENSION);
        let target = self.path_for(id, TRANSMISSION_EXTENSION);

        let mut file = File::create(&temp)?;
        file.write_all(&encoded)?;
        file.sync_data()?;
        drop(file);
        fs::rename(&temp, &target)?;

        // A resent transmission replaces its claimed copy
        remove_if_exists(&self.path_for(id, IN_FLIGHT_EXTENSION))?;

        debug!(
            bytes = needed,
            attempts = transmission.attempts(),
            "Transmission persisted for a later resend"
        );
        Ok(())
    }

    /// Remove the oldest files until `needed` more bytes fit
    fn evict_for(&self, incoming: TransmissionId, needed: u64) -> Result<(), ContractError> {
        let pending = self.list_pending()?;
        let mut used: u64 = pending
            .iter()
            .filter(|file| file.id != incoming)
            .map(|file| file.len)
            .sum();

        for file in pending.iter().filter(|file| file.id != incoming) {
            if used + needed <= self.capacity {
                break;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    used = used.saturating_sub(file.len);
                    warn!(
                        output = %self.name,
                        transmission_id = %file.id,
                        bytes = file.len,
                        "Storage capacity reached, evicted oldest transmission"
                    );
                    counter!("telemetry_channel_transmissions_evicted_total").increment(1);
                }
                // Claimed by the loader in the meantime
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    used = used.saturating_sub(file.len);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Claim and load the oldest pending transmission
    ///
    /// Corrupt files and files that used up their retry budget are removed
    /// and skipped.
    pub fn claim_oldest(&self) -> Option<Transmission> {
        let pending = match self.list_pending() {
            Ok(pending) => pending,
            Err(e) => {
                error!(directory = %self.directory.display(), error = %e, "Failed to list stored transmissions");
                return None;
            }
        };

        for file in pending {
            let claimed = self.path_for(file.id, IN_FLIGHT_EXTENSION);
            if fs::rename(&file.path, &claimed).is_err() {
                continue;
            }

            match self.load(&claimed, file.id) {
                Ok(transmission) if transmission.attempts() >= self.max_send_attempts => {
                    warn!(
                        transmission_id = %file.id,
                        attempts = transmission.attempts(),
                        max_send_attempts = self.max_send_attempts,
                        "Retry budget exhausted, discarding stored transmission"
                    );
                    counter!("telemetry_channel_transmissions_dropped_total", "reason" => "retry_budget")
                        .increment(1);
                    let _ = remove_if_exists(&claimed);
                }
                Ok(transmission) => return Some(transmission),
                Err(e) => {
                    warn!(error = %e, "Removing unreadable stored transmission");
                    counter!("telemetry_channel_transmissions_dropped_total", "reason" => "corrupt")
                        .increment(1);
                    let _ = remove_if_exists(&claimed);
                }
            }
        }
        None
    }

    fn load(&self, path: &Path, expected: TransmissionId) -> Result<Transmission, ContractError> {
        let bytes = fs::read(path)?;
        let transmission: Transmission = codec()
            .with_limit(self.capacity)
            .deserialize(&bytes)
            .map_err(|e| ContractError::corrupt_transmission(path.display().to_string(), e.to_string()))?;
        if transmission.id() != expected {
            return Err(ContractError::corrupt_transmission(
                path.display().to_string(),
                format!("file holds transmission {}", transmission.id()),
            ));
        }
        Ok(transmission)
    }

    /// Hand a claimed transmission back to the pending set
    ///
    /// A newer `.trn` copy wins over the claimed one. Returns whether a
    /// claimed file existed.
    pub fn release_claim(&self, id: TransmissionId) -> bool {
        let claimed = self.path_for(id, IN_FLIGHT_EXTENSION);
        let target = self.path_for(id, TRANSMISSION_EXTENSION);
        let result = if target.exists() {
            remove_if_exists(&claimed)
        } else {
            match fs::rename(&claimed, &target) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(released) => {
                if released {
                    debug!(transmission_id = %id, "Claimed transmission released");
                }
                released
            }
            Err(e) => {
                warn!(transmission_id = %id, error = %e, "Failed to release claimed transmission");
                false
            }
        }
    }

    /// Forget a transmission after it was delivered
    ///
    /// Returns whether a stored copy existed.
    pub fn delete_transmission(&self, id: TransmissionId) -> bool {
        let mut deleted = false;
        for extension in [IN_FLIGHT_EXTENSION, TRANSMISSION_EXTENSION] {
            match remove_if_exists(&self.path_for(id, extension)) {
                Ok(existed) => deleted |= existed,
                Err(e) => warn!(transmission_id = %id, error = %e, "Failed to delete stored transmission"),
            }
        }
        if deleted {
            debug!(transmission_id = %id, "Stored transmission deleted");
        }
        deleted
    }

    /// Highest id present in the directory (pending or claimed)
    pub fn max_stored_id(&self) -> Option<TransmissionId> {
        fs::read_dir(&self.directory)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_id(&entry.path()))
            .max()
    }

    /// Status of `directory` without creating or recovering it
    pub fn inspect(directory: impl Into<PathBuf>, capacity: u64) -> Result<StorageStatus, ContractError> {
        Self {
            name: String::from("inspect"),
            directory: directory.into(),
            capacity,
            max_send_attempts: 0,
        }
        .status()
    }

    /// Count pending files and bytes
    pub fn status(&self) -> Result<StorageStatus, ContractError> {
        let pending = self.list_pending()?;
        let in_flight_files = fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| extension_of(&entry.path()) == Some(IN_FLIGHT_EXTENSION))
            .count();

        Ok(StorageStatus {
            directory: self.directory.clone(),
            pending_files: pending.len(),
            pending_bytes: pending.iter().map(|file| file.len).sum(),
            in_flight_files,
            capacity_bytes: self.capacity,
        })
    }
}

impl TransmissionOutput for FileSystemOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, transmission: Transmission) -> Result<(), ContractError> {
        self.persist(&transmission)
    }

    async fn close(&self) -> Result<(), ContractError> {
        debug!(output = %self.name, "FileSystemOutput closed");
        Ok(())
    }
}

/// On-disk encoding. Reads are limited to the store capacity so a corrupt
/// length prefix cannot trigger a huge allocation.
fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

fn parse_id(path: &Path) -> Option<TransmissionId> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
