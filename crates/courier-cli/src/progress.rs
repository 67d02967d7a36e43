use courier_core::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Staging: progress bar per batch (file count known from the plan)
/// - Upload: spinner per archive
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICK_CHARS));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl ProgressReporter for CliReporter {
    fn on_batch_start(&self, batch: &str, files: usize) {
        let pb = ProgressBar::new(files as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.cyan} Staging {prefix} [{bar:30.cyan/dim}] {pos}/{len} files",
        ) {
            pb.set_style(style.progress_chars("━╸─").tick_chars(TICK_CHARS));
        }
        pb.set_prefix(batch.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_file_staged(&self, _files_staged: usize, _current_path: &str) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.inc(1);
            }
        }
    }

    fn on_batch_complete(&self, batch: &str, staged: usize, failed: usize) {
        self.finish_bar();
        if failed == 0 {
            eprintln!("  \x1b[32m✓\x1b[0m Staged {}: {} files", batch, staged);
        } else {
            eprintln!(
                "  \x1b[33m!\x1b[0m Staged {}: {} files, {} failed",
                batch, staged, failed
            );
        }
    }

    fn on_archive_complete(&self, archive: &str, files: usize, bytes: u64) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m Archived {}: {} files, {} bytes",
            archive, files, bytes
        );
    }

    fn on_upload_start(&self, archive: &str) {
        self.set_bar(Self::spinner(format!("Uploading {}...", archive)));
    }

    fn on_upload_complete(&self, archive: &str, succeeded: bool, attempts: u32) {
        self.finish_bar();
        if succeeded {
            eprintln!(
                "  \x1b[32m✓\x1b[0m Delivered {} ({} attempt(s))",
                archive, attempts
            );
        } else {
            eprintln!(
                "  \x1b[31m✗\x1b[0m Upload of {} failed after {} attempt(s)",
                archive, attempts
            );
        }
    }
}
