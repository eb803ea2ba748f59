use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NusError {
    #[error("invalid title id: {0}")]
    #[diagnostic(help("title ids are 16 hexadecimal characters, e.g. 0005000010101a00"))]
    InvalidTitleId(String),

    #[error("missing config file at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("not found (404): {0}")]
    NotFound(String),

    #[error("transfer failed for {url}: {message}")]
    Transfer { url: String, message: String },

    #[error("server returned status {status} for {url}")]
    TransferStatus { url: String, status: u16 },

    #[error("TMD too short or malformed: {len} bytes, header needs {min}")]
    ManifestTooShort { len: usize, min: usize },

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("title database lookup failed: {0}")]
    TitleDb(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl NusError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NusError::NotFound(_))
    }
}
