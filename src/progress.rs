use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        label: String,
        total: Option<u64>,
    },
    Advanced {
        label: String,
        transferred: u64,
        total: Option<u64>,
    },
    Finished {
        label: String,
        bytes: u64,
        elapsed: Duration,
    },
}

/// Receiver for transfer progress. Called from worker threads.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// One terminal progress bar per in-flight transfer.
pub struct ConsoleProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Stderr writer for log output that clears the bars while a line is printed.
    pub fn log_writer(&self) -> LogWriter {
        LogWriter {
            multi: self.multi.clone(),
        }
    }

    fn new_bar(&self, label: &str, total: Option<u64>) -> ProgressBar {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg:<28} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {msg:<28} {bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_message(label.to_string());
        self.multi.add(bar)
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        match event {
            ProgressEvent::Started { label, total } => {
                let bar = self.new_bar(&label, total);
                bars.insert(label, bar);
            }
            ProgressEvent::Advanced {
                label, transferred, ..
            } => {
                if let Some(bar) = bars.get(&label) {
                    bar.set_position(transferred);
                }
            }
            ProgressEvent::Finished { label, .. } => {
                if let Some(bar) = bars.remove(&label) {
                    bar.finish_and_clear();
                    self.multi.remove(&bar);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct LogWriter {
    multi: MultiProgress,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi
            .suspend(|| io::stderr().write_all(buf))
            .map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_are_dropped_when_finished() {
        let progress = ConsoleProgress::hidden();
        progress.event(ProgressEvent::Started {
            label: "00000001.app".into(),
            total: Some(10),
        });
        progress.event(ProgressEvent::Advanced {
            label: "00000001.app".into(),
            transferred: 10,
            total: Some(10),
        });
        assert_eq!(progress.bars.lock().unwrap().len(), 1);
        progress.event(ProgressEvent::Finished {
            label: "00000001.app".into(),
            bytes: 10,
            elapsed: Duration::ZERO,
        });
        assert!(progress.bars.lock().unwrap().is_empty());
    }

    #[test]
    fn log_writer_writes_whole_line() {
        let progress = ConsoleProgress::hidden();
        let mut writer = progress.log_writer();
        assert_eq!(writer.write(b"log line\n").unwrap(), 9);
        writer.flush().unwrap();
    }
}
