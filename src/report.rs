use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::{ContentDescriptor, TitleStats};
use crate::error::NusError;
use crate::sync::TitleReport;

#[derive(Debug, Serialize)]
pub struct ReportFile<'a> {
    pub title_id: &'a str,
    pub title_name: &'a str,
    pub tmd_version: Option<u8>,
    pub generated_at: String,
    pub summary: &'a TitleStats,
    pub contents: &'a [ContentDescriptor],
}

impl<'a> From<&'a TitleReport> for ReportFile<'a> {
    fn from(value: &'a TitleReport) -> Self {
        Self {
            title_id: value.title_id.as_str(),
            title_name: &value.title_name,
            tmd_version: value.tmd_version,
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: &value.stats,
            contents: &value.contents,
        }
    }
}

/// Writes `{dir}/{titleid}_report.json` through a temp file in the same directory.
pub fn write_report(dir: &Utf8Path, report: &TitleReport) -> Result<Utf8PathBuf, NusError> {
    fs::create_dir_all(dir.as_std_path()).map_err(|err| NusError::Filesystem(err.to_string()))?;
    let path = dir.join(report.title_id.report_file_name());
    let content = serde_json::to_vec_pretty(&ReportFile::from(report))
        .map_err(|err| NusError::Filesystem(err.to_string()))?;

    let mut temp = tempfile::Builder::new()
        .prefix("nus-sync-report")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| NusError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .map_err(|err| NusError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| NusError::Filesystem(err.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::TitleState;

    #[test]
    fn report_uses_hash_key_for_digest() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let report = TitleReport {
            title_id: "0005000010101a00".parse().unwrap(),
            title_name: "Unknown Title".to_string(),
            tmd_version: Some(1),
            contents: vec![ContentDescriptor {
                index: 0,
                content_id: "00000000".to_string(),
                size: 32768,
                expected_digest: "ab".repeat(32),
            }],
            outcomes: Vec::new(),
            stats: TitleStats {
                ok: 1,
                ..TitleStats::default()
            },
            state: TitleState::ContentsCollected,
            report_path: None,
            organized: None,
        };

        let path = write_report(&dir, &report).unwrap();
        assert!(path.ends_with("0005000010101a00_report.json"));
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
        assert_eq!(value["title_id"], "0005000010101a00");
        assert_eq!(value["summary"]["ok"], 1);
        assert_eq!(value["contents"][0]["hash"], "ab".repeat(32));
        assert_eq!(value["contents"][0]["content_id"], "00000000");
    }
}
