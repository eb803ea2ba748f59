use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::{ContentDescriptor, TitleId};
use crate::error::NusError;
use crate::progress::{ProgressEvent, ProgressSink};

pub const DEFAULT_BASE_URL: &str = "http://ccs.cdn.wup.shop.nintendo.net/ccs/download/";

const CHUNK_SIZE: usize = 64 * 1024;
/// Progress is reported at most once per this many bytes.
const PROGRESS_STEP: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl FetchStats {
    /// Average bytes per second, 0 when no time elapsed.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

pub trait Fetcher: Send + Sync {
    /// Streams `url` into `destination`, overwriting it. A 404 is [`NusError::NotFound`].
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<FetchStats, NusError>;

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, NusError>;
}

/// Builds endpoint URLs below a server base.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base: &str) -> Self {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn tmd_url(&self, title: &TitleId) -> String {
        format!("{}{}/tmd", self.base, title.as_str())
    }

    pub fn content_url(&self, title: &TitleId, content: &ContentDescriptor) -> String {
        format!("{}{}/{}", self.base, title.as_str(), content.content_id)
    }

    pub fn h3_url(&self, title: &TitleId, content: &ContentDescriptor) -> String {
        format!("{}.h3", self.content_url(title, content))
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, NusError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("nus-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NusError::Transfer {
                    url: String::new(),
                    message: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| NusError::Transfer {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn send_with_retries<F>(&self, url: &str, mut make_req: F) -> Result<Response, NusError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        debug!(url, status, attempt, "retrying");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        debug!(url, error = %err, attempt, "retrying");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(NusError::Transfer {
                        url: url.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn get(&self, url: &str) -> Result<Response, NusError> {
        let response = self.send_with_retries(url, || self.client.get(url))?;
        handle_status(url, response)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<FetchStats, NusError> {
        let start = Instant::now();
        let response = self.get(url)?;
        let total = response.content_length();
        let label = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string());

        progress.event(ProgressEvent::Started {
            label: label.clone(),
            total,
        });
        let result = stream_to_file(url, response, destination, total, &label, progress);
        let bytes = match &result {
            Ok(bytes) => *bytes,
            Err(_) => 0,
        };
        let elapsed = start.elapsed();
        progress.event(ProgressEvent::Finished {
            label,
            bytes,
            elapsed,
        });

        let stats = FetchStats {
            bytes: result?,
            elapsed,
        };
        debug!(
            url,
            bytes = stats.bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            kib_per_sec = stats.throughput() / 1024.0,
            "transfer finished"
        );
        Ok(stats)
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, NusError> {
        let response = self.get(url)?;
        let bytes = response.bytes().map_err(|err| NusError::Transfer {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

fn stream_to_file(
    url: &str,
    mut response: Response,
    destination: &Path,
    total: Option<u64>,
    label: &str,
    progress: &dyn ProgressSink,
) -> Result<u64, NusError> {
    let file = File::create(destination)
        .map_err(|err| NusError::Filesystem(format!("create {}: {err}", destination.display())))?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    let mut reported = 0u64;

    loop {
        let read = response.read(&mut buffer).map_err(|err| NusError::Transfer {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .map_err(|err| NusError::Filesystem(format!("write {}: {err}", destination.display())))?;
        transferred += read as u64;
        if transferred - reported >= PROGRESS_STEP {
            reported = transferred;
            progress.event(ProgressEvent::Advanced {
                label: label.to_string(),
                transferred,
                total,
            });
        }
    }

    writer
        .flush()
        .map_err(|err| NusError::Filesystem(format!("flush {}: {err}", destination.display())))?;
    progress.event(ProgressEvent::Advanced {
        label: label.to_string(),
        transferred,
        total,
    });
    Ok(transferred)
}

fn handle_status(url: &str, response: Response) -> Result<Response, NusError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(NusError::NotFound(url.to_string()));
    }
    Err(NusError::TransferStatus {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
