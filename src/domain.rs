use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NusError;

pub const APP_EXTENSION: &str = "app";
pub const H3_EXTENSION: &str = "h3";
pub const TICKET_EXTENSION: &str = "tik";

fn title_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{16}$").expect("title id regex"))
}

/// A 64-bit title identifier in its canonical lowercase hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TitleId(String);

impl TitleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn upper(&self) -> String {
        self.0.to_uppercase()
    }

    pub fn manifest_file_name(&self) -> String {
        format!("{}_tmd", self.0)
    }

    pub fn ticket_file_name(&self) -> String {
        format!("{}.{TICKET_EXTENSION}", self.0)
    }

    pub fn report_file_name(&self) -> String {
        format!("{}_report.json", self.0)
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TitleId {
    type Err = NusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !title_id_regex().is_match(trimmed) {
            return Err(NusError::InvalidTitleId(value.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }
}

/// One content record of a TMD that survived the sanity filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentDescriptor {
    pub index: u16,
    pub content_id: String,
    pub size: u64,
    #[serde(rename = "hash")]
    pub expected_digest: String,
}

impl ContentDescriptor {
    pub fn app_file_name(&self) -> String {
        format!("{}.{APP_EXTENSION}", self.content_id)
    }

    pub fn h3_file_name(&self, title: &TitleId) -> String {
        format!("{}_{}.{H3_EXTENSION}", title.as_str(), self.content_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Ok,
    Skipped,
    Failed,
    HashFail,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppStatus::Ok => write!(f, "ok"),
            AppStatus::Skipped => write!(f, "skipped"),
            AppStatus::Failed => write!(f, "failed"),
            AppStatus::HashFail => write!(f, "hash_fail"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum H3Status {
    NotAttempted,
    Ok,
    Skipped,
    Failed,
}

impl fmt::Display for H3Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            H3Status::NotAttempted => write!(f, "not_attempted"),
            H3Status::Ok => write!(f, "ok"),
            H3Status::Skipped => write!(f, "skipped"),
            H3Status::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one fetch-verify-repair task. The only value a worker hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentOutcome {
    pub content_id: String,
    pub app_status: AppStatus,
    pub local_path: PathBuf,
    pub h3_status: H3Status,
}

/// Per-category outcome counters for one title (or a whole batch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TitleStats {
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub hash_fail: usize,
    pub h3_ok: usize,
    pub h3_failed: usize,
    pub h3_skipped: usize,
}

impl TitleStats {
    pub fn record(&mut self, outcome: &ContentOutcome) {
        match outcome.app_status {
            AppStatus::Ok => self.ok += 1,
            AppStatus::Skipped => self.skipped += 1,
            AppStatus::Failed => self.failed += 1,
            AppStatus::HashFail => self.hash_fail += 1,
        }
        match outcome.h3_status {
            H3Status::NotAttempted => {}
            H3Status::Ok => self.h3_ok += 1,
            H3Status::Skipped => self.h3_skipped += 1,
            H3Status::Failed => self.h3_failed += 1,
        }
    }

    pub fn merge(&mut self, other: &TitleStats) {
        self.ok += other.ok;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.hash_fail += other.hash_fail;
        self.h3_ok += other.h3_ok;
        self.h3_failed += other.h3_failed;
        self.h3_skipped += other.h3_skipped;
    }

    pub fn app_total(&self) -> usize {
        self.ok + self.failed + self.skipped + self.hash_fail
    }
}

impl fmt::Display for TitleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} skipped={} failed={} hash_fail={}",
            self.ok, self.skipped, self.failed, self.hash_fail
        )?;
        if self.h3_ok + self.h3_failed + self.h3_skipped > 0 {
            write!(
                f,
                " h3_ok={} h3_skipped={} h3_failed={}",
                self.h3_ok, self.h3_skipped, self.h3_failed
            )?;
        }
        Ok(())
    }
}
