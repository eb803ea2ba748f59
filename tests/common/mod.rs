#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};

use nus_sync::error::NusError;
use nus_sync::fetch::{FetchStats, Fetcher};
use nus_sync::progress::{ProgressEvent, ProgressSink};
use nus_sync::tmd::{CONTENT_COUNT_OFFSET, RECORD_SIZE, RECORDS_OFFSET, VERSION_OFFSET};

pub const BASE: &str = "http://nus.test/ccs/download/";

/// Scripted failure for one url.
#[derive(Clone)]
pub enum Failure {
    /// Writes these bytes to the destination, then breaks the connection.
    Interrupted(Vec<u8>),
    /// Server answers with a non-2xx status before any byte is written.
    Status(u16),
}

#[derive(Default)]
pub struct MockFetcher {
    files: HashMap<String, Vec<u8>>,
    failures: HashMap<String, Failure>,
    delays: HashMap<String, Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn with(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.into(), body.into());
        self
    }

    pub fn failing(mut self, url: impl Into<String>, failure: Failure) -> Self {
        self.failures.insert(url.into(), failure);
        self
    }

    pub fn with_delay(mut self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(url.into(), delay);
        self
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| called.as_str() == url)
            .count()
    }

    fn lookup(&self, url: &str) -> Result<&Vec<u8>, NusError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            thread::sleep(*delay);
        }
        self.files
            .get(url)
            .ok_or_else(|| NusError::NotFound(url.to_string()))
    }
}

impl Fetcher for MockFetcher {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<FetchStats, NusError> {
        if let Some(failure) = self.failures.get(url) {
            self.calls.lock().unwrap().push(url.to_string());
            return Err(match failure {
                Failure::Interrupted(partial) => {
                    std::fs::write(destination, partial)
                        .map_err(|err| NusError::Filesystem(err.to_string()))?;
                    NusError::Transfer {
                        url: url.to_string(),
                        message: "connection reset".to_string(),
                    }
                }
                Failure::Status(status) => NusError::TransferStatus {
                    url: url.to_string(),
                    status: *status,
                },
            });
        }
        let body = self.lookup(url)?;
        std::fs::write(destination, body).map_err(|err| NusError::Filesystem(err.to_string()))?;
        progress.event(ProgressEvent::Finished {
            label: url.to_string(),
            bytes: body.len() as u64,
            elapsed: Duration::ZERO,
        });
        Ok(FetchStats {
            bytes: body.len() as u64,
            elapsed: Duration::ZERO,
        })
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, NusError> {
        self.lookup(url).cloned()
    }
}

/// Counts finished transfers; shared by worker threads.
#[derive(Default)]
pub struct CountingSink {
    pub finished: Mutex<usize>,
}

impl ProgressSink for CountingSink {
    fn event(&self, event: ProgressEvent) {
        if let ProgressEvent::Finished { .. } = event {
            *self.finished.lock().unwrap() += 1;
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub struct Record {
    pub id: u32,
    pub index: u16,
    pub size: u64,
    pub digest: [u8; 32],
}

impl Record {
    pub fn for_body(id: u32, index: u16, body: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(body));
        Self {
            id,
            index,
            size: body.len() as u64,
            digest,
        }
    }

    pub fn raw(id: u32, index: u16, size: u64) -> Self {
        Self {
            id,
            index,
            size,
            digest: [0x11; 32],
        }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.id.to_be_bytes());
        out[4..6].copy_from_slice(&self.index.to_be_bytes());
        out[8..16].copy_from_slice(&self.size.to_be_bytes());
        out[16..48].copy_from_slice(&self.digest);
        out
    }
}

pub fn build_tmd(version: u8, declared: u16, records: &[Record]) -> Vec<u8> {
    let mut raw = vec![0u8; RECORDS_OFFSET];
    raw[VERSION_OFFSET] = version;
    raw[CONTENT_COUNT_OFFSET..CONTENT_COUNT_OFFSET + 2].copy_from_slice(&declared.to_be_bytes());
    for record in records {
        raw.extend_from_slice(&record.encode());
    }
    raw
}
