//! Terminal progress rendering.
//!
//! One overall bar counts finished files. Each running transfer gets its own
//! byte bar that disappears when the transfer ends.

use std::collections::HashMap;
use std::sync::Mutex;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use s3bulk::transfer::{ProgressEvent, ProgressSink};
use s3bulk::ObjectKey;

const OVERALL_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta})";
const FILE_TEMPLATE: &str =
    "  {msg:40!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// Progress sink drawing indicatif bars on stderr.
pub struct TerminalProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    files: Mutex<HashMap<ObjectKey, ProgressBar>>,
    file_style: ProgressStyle,
}

impl TerminalProgress {
    /// Create the bars. `hidden` suppresses all drawing (for JSON output).
    pub fn new(hidden: bool) -> Self {
        let multi = if hidden {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let overall = multi.add(ProgressBar::new(0));
        overall.set_style(template(OVERALL_TEMPLATE).progress_chars("=> "));

        Self {
            multi,
            overall,
            files: Mutex::new(HashMap::new()),
            file_style: template(FILE_TEMPLATE).progress_chars("=> "),
        }
    }

    /// Stop drawing and leave the overall bar in its final state.
    pub fn finish(&self) {
        if let Ok(mut files) = self.files.lock() {
            for (_, bar) in files.drain() {
                bar.finish_and_clear();
            }
        }
        self.overall.finish();
    }
}

fn template(text: &str) -> ProgressStyle {
    ProgressStyle::with_template(text).unwrap_or_else(|_| ProgressStyle::default_bar())
}

impl ProgressSink for TerminalProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Batch { completed, total } => {
                self.overall.set_length(total as u64);
                self.overall.set_position(completed as u64);
            }
            ProgressEvent::Started {
                key, total_bytes, ..
            } => {
                let bar = self.multi.add(ProgressBar::new(total_bytes));
                bar.set_style(self.file_style.clone());
                bar.set_message(key.file_name().to_string());
                if let Ok(mut files) = self.files.lock() {
                    files.insert(key, bar);
                }
            }
            ProgressEvent::Bytes {
                key, transferred, ..
            } => {
                if let Ok(files) = self.files.lock() {
                    if let Some(bar) = files.get(&key) {
                        bar.set_position(transferred);
                    }
                }
            }
            ProgressEvent::Finished { key, success } => {
                let bar = self.files.lock().ok().and_then(|mut files| files.remove(&key));
                if let Some(bar) = bar {
                    bar.finish_and_clear();
                    self.multi.remove(&bar);
                }
                if !success {
                    self.overall
                        .println(format!("{} {}", style("failed").red().bold(), key));
                }
            }
        }
    }
}
