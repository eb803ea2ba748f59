//! Per-title fetch, verify and repair of TMD contents.
//!
//! One title at a time: the TMD is fetched and parsed, then every content record is handed to a
//! fixed pool of worker threads. Workers only return [`ContentOutcome`] values over a channel;
//! the calling thread is the single writer of [`TitleStats`].

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use camino::Utf8PathBuf;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_WORKERS;
use crate::domain::{AppStatus, ContentDescriptor, ContentOutcome, H3Status, TitleId, TitleStats};
use crate::error::NusError;
use crate::fetch::{Endpoints, Fetcher};
use crate::layout::{self, OrganizeResult};
use crate::progress::ProgressSink;
use crate::report;
use crate::titledb::TitleNameLookup;
use crate::tmd;
use crate::verify;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub download_dir: Utf8PathBuf,
    pub ticket_dir: Utf8PathBuf,
    /// Re-download files that already exist.
    pub force: bool,
    pub verify_hashes: bool,
    pub fetch_h3: bool,
    pub organize: bool,
    pub workers: usize,
    /// Where `{titleid}_report.json` is written; `None` disables the report.
    pub report_dir: Option<Utf8PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            download_dir: Utf8PathBuf::from("downloads"),
            ticket_dir: Utf8PathBuf::from("ticket"),
            force: false,
            verify_hashes: true,
            fetch_h3: false,
            organize: true,
            workers: DEFAULT_WORKERS,
            report_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleState {
    Init,
    ManifestFetched,
    ManifestParsed,
    ContentsDispatched,
    ContentsCollected,
    Reported,
    Organized,
}

impl fmt::Display for TitleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TitleState::Init => "init",
            TitleState::ManifestFetched => "manifest-fetched",
            TitleState::ManifestParsed => "manifest-parsed",
            TitleState::ContentsDispatched => "contents-dispatched",
            TitleState::ContentsCollected => "contents-collected",
            TitleState::Reported => "reported",
            TitleState::Organized => "organized",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone)]
pub struct TitleReport {
    pub title_id: TitleId,
    pub title_name: String,
    pub tmd_version: Option<u8>,
    pub contents: Vec<ContentDescriptor>,
    pub outcomes: Vec<ContentOutcome>,
    pub stats: TitleStats,
    pub state: TitleState,
    pub report_path: Option<Utf8PathBuf>,
    pub organized: Option<OrganizeResult>,
}

impl TitleReport {
    pub fn ticket_attached(&self) -> bool {
        self.organized
            .as_ref()
            .map(|organized| organized.ticket_attached)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct TitleFailure {
    pub title_id: TitleId,
    pub title_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub titles: Vec<TitleReport>,
    pub failures: Vec<TitleFailure>,
    pub totals: TitleStats,
}

impl BatchSummary {
    /// True when at least one title had its ticket copied next to its contents.
    pub fn ticket_attached(&self) -> bool {
        self.titles.iter().any(TitleReport::ticket_attached)
    }
}

/// Runs after a batch, outside the library. Used by the binary for the decryption step.
pub trait PostRunHook {
    fn after_batch(&self, summary: &BatchSummary);
}

pub struct Syncer<F: Fetcher> {
    fetcher: F,
    endpoints: Endpoints,
    options: SyncOptions,
}

impl<F: Fetcher> Syncer<F> {
    pub fn new(fetcher: F, endpoints: Endpoints, options: SyncOptions) -> Self {
        Self {
            fetcher,
            endpoints,
            options,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Processes titles one after another. A failing title is recorded and skipped.
    pub fn run_batch(
        &self,
        titles: &[TitleId],
        lookup: &dyn TitleNameLookup,
        sink: &dyn ProgressSink,
    ) -> BatchSummary {
        let names = lookup.titles();
        let mut summary = BatchSummary::default();

        for title in titles {
            let title_name = names.display_name(title).to_string();
            match self.sync_title(title, &title_name, sink) {
                Ok(report) => {
                    summary.totals.merge(&report.stats);
                    summary.titles.push(report);
                }
                Err(err) => {
                    error!(title = %title, error = %err, "error processing {title_name}");
                    summary.failures.push(TitleFailure {
                        title_id: title.clone(),
                        title_name,
                        error: err.to_string(),
                    });
                }
            }
        }

        summary
    }

    pub fn sync_title(
        &self,
        title: &TitleId,
        title_name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<TitleReport, NusError> {
        let mut state = TitleState::Init;
        info!("fetching TMD for {title} ({title_name})");

        let raw = self.fetcher.fetch_bytes(&self.endpoints.tmd_url(title))?;
        advance(title, &mut state, TitleState::ManifestFetched);
        self.save_manifest(title, &raw)?;

        let tmd = tmd::parse(&raw)?;
        advance(title, &mut state, TitleState::ManifestParsed);
        match tmd.version {
            Some(version) => info!("{title_name} ({title}) - TMD version: {version}"),
            None => info!("{title_name} ({title}) - TMD version: unknown"),
        }
        info!(
            "{title_name} ({title}) - {} valid contents",
            tmd.contents.len()
        );

        advance(title, &mut state, TitleState::ContentsDispatched);
        let (outcomes, stats) = self.dispatch(title, &tmd.contents, sink);
        advance(title, &mut state, TitleState::ContentsCollected);
        info!("{title_name} summary: {stats}");

        let mut report = TitleReport {
            title_id: title.clone(),
            title_name: title_name.to_string(),
            tmd_version: tmd.version,
            contents: tmd.contents,
            outcomes,
            stats,
            state,
            report_path: None,
            organized: None,
        };

        if let Some(dir) = &self.options.report_dir {
            match report::write_report(dir, &report) {
                Ok(path) => {
                    info!("saved JSON report to {path}");
                    report.report_path = Some(path);
                }
                Err(err) => warn!(error = %err, "failed to write report for {title}"),
            }
        }
        advance(title, &mut report.state, TitleState::Reported);

        if self.options.organize {
            match layout::organize(title, &self.options.download_dir, &self.options.ticket_dir) {
                Ok(organized) => {
                    report.organized = Some(organized);
                    advance(title, &mut report.state, TitleState::Organized);
                }
                Err(err) => warn!(error = %err, "failed to organize files for {title}"),
            }
        }

        Ok(report)
    }

    /// Runs one task per content on the worker pool and aggregates the outcomes as they arrive.
    pub fn dispatch(
        &self,
        title: &TitleId,
        contents: &[ContentDescriptor],
        sink: &dyn ProgressSink,
    ) -> (Vec<ContentOutcome>, TitleStats) {
        let workers = self.options.workers.max(1).min(contents.len().max(1));
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<ContentOutcome>();
        let mut outcomes = Vec::with_capacity(contents.len());
        let mut stats = TitleStats::default();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let slot = next.fetch_add(1, Ordering::Relaxed);
                        let Some(content) = contents.get(slot) else {
                            break;
                        };
                        if tx.send(self.process_content(title, content, sink)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for outcome in rx {
                stats.record(&outcome);
                if self.options.fetch_h3 {
                    info!(
                        "content {}: .app={}, .h3={}",
                        outcome.content_id, outcome.app_status, outcome.h3_status
                    );
                } else {
                    info!("content {}: .app={}", outcome.content_id, outcome.app_status);
                }
                outcomes.push(outcome);
            }
        });

        (outcomes, stats)
    }

    /// Fetch-verify-repair of one content and, when enabled, its `.h3` side-file.
    pub fn process_content(
        &self,
        title: &TitleId,
        content: &ContentDescriptor,
        sink: &dyn ProgressSink,
    ) -> ContentOutcome {
        let app_path = self.options.download_dir.join(content.app_file_name());
        let url = self.endpoints.content_url(title, content);
        let app_status = self.sync_app(&url, app_path.as_std_path(), content, sink);

        let h3_status = if self.options.fetch_h3 {
            self.sync_h3(title, content, sink)
        } else {
            H3Status::NotAttempted
        };

        ContentOutcome {
            content_id: content.content_id.clone(),
            app_status,
            local_path: app_path.into_std_path_buf(),
            h3_status,
        }
    }

    fn sync_app(
        &self,
        url: &str,
        path: &Path,
        content: &ContentDescriptor,
        sink: &dyn ProgressSink,
    ) -> AppStatus {
        if path.exists() && !self.options.force {
            if !self.options.verify_hashes {
                return AppStatus::Skipped;
            }
            // an existing file is never removed without a fresh download
            return match verify::verify(path, &content.expected_digest) {
                Ok(()) => AppStatus::Skipped,
                Err(err @ NusError::HashMismatch { .. }) => {
                    warn!(error = %err, "existing file left in place");
                    AppStatus::HashFail
                }
                Err(err) => {
                    error!(error = %err, "could not hash existing file");
                    AppStatus::Failed
                }
            };
        }

        if let Err(err) = self.fetcher.fetch(url, path, sink) {
            match err {
                NusError::NotFound(_) => warn!("content not found (404): {url}"),
                NusError::Transfer { .. } | NusError::Filesystem(_) => {
                    error!(error = %err, "download failed");
                    remove_invalid(path);
                }
                _ => error!(error = %err, "download failed"),
            }
            return AppStatus::Failed;
        }

        if !self.options.verify_hashes {
            return AppStatus::Ok;
        }

        match verify::verify(path, &content.expected_digest) {
            Ok(()) => AppStatus::Ok,
            Err(err @ NusError::HashMismatch { .. }) => {
                error!(error = %err, "hash mismatch");
                remove_invalid(path);
                AppStatus::HashFail
            }
            Err(err) => {
                error!(error = %err, "could not hash downloaded file");
                AppStatus::Failed
            }
        }
    }

    fn sync_h3(
        &self,
        title: &TitleId,
        content: &ContentDescriptor,
        sink: &dyn ProgressSink,
    ) -> H3Status {
        let path = self.options.download_dir.join(content.h3_file_name(title));
        if path.as_std_path().exists() && !self.options.force {
            return H3Status::Skipped;
        }
        let url = self.endpoints.h3_url(title, content);
        match self.fetcher.fetch(&url, path.as_std_path(), sink) {
            Ok(_) => H3Status::Ok,
            Err(err) => {
                warn!(error = %err, "h3 download failed");
                // a partial side-file would otherwise count as present on the next run
                if matches!(err, NusError::Transfer { .. } | NusError::Filesystem(_)) {
                    remove_invalid(path.as_std_path());
                }
                H3Status::Failed
            }
        }
    }

    fn save_manifest(&self, title: &TitleId, raw: &[u8]) -> Result<(), NusError> {
        let dir = self.options.download_dir.as_std_path();
        fs::create_dir_all(dir).map_err(|err| NusError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("nus-sync-tmd")
            .tempfile_in(dir)
            .map_err(|err| NusError::Filesystem(err.to_string()))?;
        temp.write_all(raw)
            .map_err(|err| NusError::Filesystem(err.to_string()))?;
        temp.persist(dir.join(title.manifest_file_name()))
            .map_err(|err| NusError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn advance(title: &TitleId, state: &mut TitleState, next: TitleState) {
    debug!(title = %title, from = %state, to = %next, "title state");
    *state = next;
}

fn remove_invalid(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => info!("removed corrupted file {}", path.display()),
        Err(err) => warn!("could not remove file {}: {err}", path.display()),
    }
}
