//! Gzip serializer - newline-delimited JSON batches

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::{error, warn};

use contracts::{
    ContractError, Transmission, TransmissionIdGenerator, GZIP_CONTENT_ENCODING,
    JSON_STREAM_CONTENT_TYPE,
};

const LINE_SEPARATOR: &[u8] = b"\n";

/// Turns a batch into a compressed `Transmission`
#[derive(Debug, Clone)]
pub struct GzipSerializer {
    ids: Arc<TransmissionIdGenerator>,
}

impl GzipSerializer {
    pub fn new(ids: Arc<TransmissionIdGenerator>) -> Self {
        Self { ids }
    }

    /// Id source shared with everything that creates transmissions
    pub fn ids(&self) -> &Arc<TransmissionIdGenerator> {
        &self.ids
    }

    /// Encode each item as one JSON line and gzip the result
    ///
    /// Items that fail to encode are skipped with a warning; `None` when
    /// nothing was left to send.
    pub fn serialize<T: Serialize>(&self, items: &[T]) -> Option<Transmission> {
        let lines: Vec<Vec<u8>> = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match serde_json::to_vec(item) {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!(index, error = %e, "Failed to serialize telemetry item, skipping");
                    None
                }
            })
            .collect();

        self.compress(&lines)
    }

    /// Frame already-encoded JSON lines into a new transmission
    pub fn serialize_lines<S: AsRef<str>>(&self, lines: &[S]) -> Option<Transmission> {
        let lines: Vec<&[u8]> = lines
            .iter()
            .map(|line| line.as_ref().trim_end().as_bytes())
            .filter(|line| !line.is_empty())
            .collect();

        self.compress(&lines)
    }

    fn compress<L: AsRef<[u8]>>(&self, lines: &[L]) -> Option<Transmission> {
        if lines.is_empty() {
            return None;
        }

        match gzip_lines(lines) {
            Ok(content) => Some(Transmission::new(
                self.ids.next_id(),
                content,
                JSON_STREAM_CONTENT_TYPE,
                GZIP_CONTENT_ENCODING,
            )),
            Err(e) => {
                error!(error = %e, lines = lines.len(), "Failed to compress batch");
                None
            }
        }
    }
}

fn gzip_lines<L: AsRef<[u8]>>(lines: &[L]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            encoder.write_all(LINE_SEPARATOR)?;
        }
        encoder.write_all(line.as_ref())?;
    }
    encoder.finish()
}

/// Recover the JSON lines carried by a transmission
///
/// # Errors
/// Fails when the payload is not valid gzip or not UTF-8.
pub fn decode_lines(transmission: &Transmission) -> Result<Vec<String>, ContractError> {
    let text = if transmission.content_encoding() == GZIP_CONTENT_ENCODING {
        let mut text = String::new();
        GzDecoder::new(transmission.content().as_ref())
            .read_to_string(&mut text)
            .map_err(|e| ContractError::serialize(format!("gzip decode failed: {e}")))?;
        text
    } else {
        String::from_utf8(transmission.content().to_vec())
            .map_err(|e| ContractError::serialize(format!("payload is not utf-8: {e}")))?
    };

    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}
