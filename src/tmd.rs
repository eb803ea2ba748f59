//! Decoding of the TMD (title metadata) binary format.
//!
//! Only the fields needed to fetch and verify contents are read: the format version, the
//! declared content count and the fixed-size content records.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::domain::ContentDescriptor;
use crate::error::NusError;

pub const VERSION_OFFSET: usize = 0x18;
pub const CONTENT_COUNT_OFFSET: usize = 0x9E;
pub const RECORDS_OFFSET: usize = 0xB04;
pub const RECORD_SIZE: usize = 0x30;
pub const MIN_TMD_SIZE: usize = RECORDS_OFFSET;
/// Anything larger is treated as a corrupt size field.
pub const MAX_CONTENT_SIZE: u64 = 8 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Padding,
    SuspiciousSize,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub entry: usize,
    pub content_id: String,
    pub size: u64,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tmd {
    /// `None` when the buffer is too short to hold the version byte.
    pub version: Option<u8>,
    pub declared_count: u16,
    pub contents: Vec<ContentDescriptor>,
    pub dropped: Vec<DroppedRecord>,
    /// Record index at which the buffer ran out, if it did.
    pub truncated_at: Option<usize>,
}

impl Tmd {
    pub fn is_truncated(&self) -> bool {
        self.truncated_at.is_some()
    }
}

pub fn tmd_version(raw: &[u8]) -> Option<u8> {
    if raw.len() > VERSION_OFFSET {
        Some(raw[VERSION_OFFSET])
    } else {
        None
    }
}

pub fn parse(raw: &[u8]) -> Result<Tmd, NusError> {
    if raw.len() < MIN_TMD_SIZE {
        return Err(NusError::ManifestTooShort {
            len: raw.len(),
            min: MIN_TMD_SIZE,
        });
    }

    let declared_count = read_u16(raw, CONTENT_COUNT_OFFSET);
    let mut contents = Vec::with_capacity(declared_count as usize);
    let mut dropped = Vec::new();
    let mut truncated_at = None;
    let mut seen = HashSet::new();

    for entry in 0..declared_count as usize {
        let offset = RECORDS_OFFSET + entry * RECORD_SIZE;
        let Some(record) = raw.get(offset..offset + RECORD_SIZE) else {
            warn!(entry, declared = declared_count, "TMD appears truncated");
            truncated_at = Some(entry);
            break;
        };

        let content_id = to_hex(&record[0..4]);
        let index = read_u16(record, 4);
        let size = read_u64(record, 8);
        let expected_digest = to_hex(&record[0x10..0x30]);

        let reason = if size == 0 && record[0..4] == [0; 4] {
            debug!(entry, "skipping padding record");
            Some(DropReason::Padding)
        } else if size == 0 || size > MAX_CONTENT_SIZE {
            warn!(content_id = %content_id, size, "skipping suspicious content");
            Some(DropReason::SuspiciousSize)
        } else if !seen.insert(content_id.clone()) {
            warn!(content_id = %content_id, entry, "duplicate content id");
            Some(DropReason::Duplicate)
        } else {
            None
        };

        if let Some(reason) = reason {
            dropped.push(DroppedRecord {
                entry,
                content_id,
                size,
                reason,
            });
            continue;
        }

        contents.push(ContentDescriptor {
            index,
            content_id,
            size,
            expected_digest,
        });
    }

    Ok(Tmd {
        version: tmd_version(raw),
        declared_count,
        contents,
        dropped,
        truncated_at,
    })
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
