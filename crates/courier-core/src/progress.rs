/// Trait for reporting run progress.
///
/// The CLI implements it with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_run_start(&self, _roots: usize) {}
    fn on_batch_start(&self, _batch: &str, _files: usize) {}
    fn on_file_staged(&self, _files_staged: usize, _current_path: &str) {}
    fn on_batch_complete(&self, _batch: &str, _staged: usize, _failed: usize) {}
    fn on_archive_complete(&self, _archive: &str, _files: usize, _bytes: u64) {}
    fn on_upload_start(&self, _archive: &str) {}
    fn on_upload_complete(&self, _archive: &str, _succeeded: bool, _attempts: u32) {}
    fn on_run_complete(&self, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
