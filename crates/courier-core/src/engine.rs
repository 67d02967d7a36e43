use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

use crate::archive::Archiver;
use crate::config::{AppConfig, Grouping};
use crate::error::Result;
use crate::policy::SelectionPolicy;
use crate::progress::ProgressReporter;
use crate::scanner::{expand_roots, FileSelector, ScanRoot, SelectOptions};
use crate::staging::{Relocator, StagingEntry, StagingPlanner};
use crate::template::{archive_and_batch_names, Placeholders};
use crate::transfer::{
    normalize_remote_dir, Connector, FtpConnector, Sleeper, ThreadSleeper, UploadTask, Uploader,
};

pub struct RunEngine {
    config: AppConfig,
    started_at: Option<DateTime<Local>>,
    connector: Box<dyn Connector>,
    sleeper: Box<dyn Sleeper>,
}

/// What one run would do, computed without touching any file.
#[derive(Debug)]
pub struct RunPlan {
    pub started_at: DateTime<Local>,
    pub policy: SelectionPolicy,
    pub roots: Vec<ScanRoot>,
    pub batches: Vec<PlannedBatch>,
    pub files_scanned: usize,
    pub failures: Vec<UnitFailure>,
}

impl RunPlan {
    pub fn files_selected(&self) -> usize {
        self.batches.iter().map(|b| b.entries.len()).sum()
    }
}

/// One staging directory and the archive built from it.
#[derive(Debug)]
pub struct PlannedBatch {
    pub archive_name: String,
    pub staging_dir: PathBuf,
    pub archive_path: PathBuf,
    pub entries: Vec<StagingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureUnit {
    File,
    Archive,
    Upload,
}

impl fmt::Display for FailureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureUnit::File => "file",
            FailureUnit::Archive => "archive",
            FailureUnit::Upload => "upload",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: FailureUnit,
    pub target: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub roots_scanned: usize,
    pub files_scanned: usize,
    pub files_selected: usize,
    pub files_moved: usize,
    /// Moved files whose source could not be deleted after every copy landed.
    pub sources_left_behind: usize,
    pub files_failed: usize,
    pub archives_built: usize,
    pub archives_failed: usize,
    pub uploads_delivered: usize,
    pub uploads_failed: usize,
    pub uploads_planned: usize,
    pub archives: Vec<PathBuf>,
    pub failures: Vec<UnitFailure>,
    pub duration: Duration,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn fail(&mut self, unit: FailureUnit, target: impl Into<String>, error: impl ToString) {
        match unit {
            FailureUnit::File => self.files_failed += 1,
            FailureUnit::Archive => self.archives_failed += 1,
            FailureUnit::Upload => self.uploads_failed += 1,
        }
        self.failures.push(UnitFailure {
            unit,
            target: target.into(),
            error: error.to_string(),
        });
    }
}

impl RunEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            started_at: None,
            connector: Box::new(FtpConnector),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Fix the run's start time instead of reading the wall clock.
    pub fn with_clock(mut self, started_at: DateTime<Local>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Expand roots, select files and compute every destination. Read-only.
    pub fn plan(&self) -> Result<RunPlan> {
        let started_at = self.started_at.unwrap_or_else(Local::now);
        let now: SystemTime = started_at.into();
        let placeholders = Placeholders::new(self.config.hostname.clone(), started_at);

        let policy = self.config.selection.resolve(started_at)?;
        info!("Selection policy: {}", policy.describe());
        let selector = FileSelector::new(&SelectOptions {
            max_depth: self.config.files_max_depth,
            include: self.config.include_patterns.clone(),
            exclude: self.config.exclude_patterns.clone(),
            policy: policy.clone(),
        })?;

        let specs = self.config.root_specs(&placeholders);
        let roots = expand_roots(&specs, &self.config.expand_options()?);
        info!("Resolved {} scan root(s) from {} spec(s)", roots.len(), specs.len());

        let staging_base = PathBuf::from(placeholders.resolve(&self.config.staging_base_dir));
        let output_dir = self
            .config
            .output_dir
            .as_deref()
            .map(|d| PathBuf::from(placeholders.resolve(d)))
            .unwrap_or_else(|| staging_base.clone());

        let mut plan = RunPlan {
            started_at,
            policy,
            roots: roots.clone(),
            batches: Vec::new(),
            files_scanned: 0,
            failures: Vec::new(),
        };

        let mut batch_names = HashSet::new();
        let mut merged: Option<(PlannedBatch, HashSet<String>)> = None;
        // Nested roots see the same file; the first root to select it owns it.
        let mut claimed: HashSet<PathBuf> = HashSet::new();
        for root in &roots {
            let selection = selector.select(root, now);
            plan.files_scanned += selection.scanned;
            let selected: Vec<_> = selection
                .selected
                .into_iter()
                .filter(|candidate| {
                    let fresh = claimed.insert(candidate.path.clone());
                    if !fresh {
                        debug!(
                            "{} already planned from an earlier root",
                            candidate.path.display()
                        );
                    }
                    fresh
                })
                .collect();
            info!(
                "{}: {} file(s) scanned, {} selected, {} not yet eligible",
                root.path.display(),
                selection.scanned,
                selected.len(),
                selection.not_eligible
            );

            let (batch, planner) = match self.config.grouping {
                Grouping::PerRoot => {
                    let label = root.label.replace('/', "_");
                    let name = placeholders.resolve_for_root(&self.config.per_root_name, &label);
                    let (archive_name, resolved_batch) = archive_and_batch_names(&name);
                    let batch_name = unique_name(&mut batch_names, resolved_batch.clone());
                    let archive_name = if batch_name == resolved_batch {
                        archive_name
                    } else {
                        format!("{}.zip", batch_name)
                    };
                    let staging_dir = staging_base.join(&batch_name);
                    let planner = StagingPlanner::new(&staging_dir, None);
                    plan.batches.push(PlannedBatch {
                        archive_path: output_dir.join(&archive_name),
                        archive_name,
                        staging_dir,
                        entries: Vec::new(),
                    });
                    let batch = plan.batches.last_mut();
                    (batch, planner)
                }
                Grouping::Merged => {
                    let (batch, subfolders) = merged.get_or_insert_with(|| {
                        let name = placeholders.resolve(&self.config.archive_name);
                        let (archive_name, batch_name) = archive_and_batch_names(&name);
                        let staging_dir = staging_base.join(&batch_name);
                        (
                            PlannedBatch {
                                archive_path: output_dir.join(&archive_name),
                                archive_name,
                                staging_dir,
                                entries: Vec::new(),
                            },
                            HashSet::new(),
                        )
                    });
                    let subfolder = unique_name(subfolders, root.label.clone());
                    let planner = StagingPlanner::new(&batch.staging_dir, Some(&subfolder));
                    (Some(batch), planner)
                }
            };
            let Some(batch) = batch else { continue };

            for candidate in selected {
                let shown = candidate.path.display().to_string();
                match planner.plan(root, candidate) {
                    Ok(entry) => batch.entries.push(entry),
                    Err(err) => {
                        warn!("Cannot plan {}: {}", shown, err);
                        plan.failures.push(UnitFailure {
                            unit: FailureUnit::File,
                            target: shown,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
        if let Some((batch, _)) = merged {
            plan.batches.push(batch);
        }
        Ok(plan)
    }

    /// Run the whole pipeline once. Unit failures are collected in the report;
    /// only configuration problems are returned as errors.
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<RunReport> {
        let start = Instant::now();
        let plan = self.plan()?;
        let placeholders = Placeholders::new(self.config.hostname.clone(), plan.started_at);

        let mut report = RunReport {
            roots_scanned: plan.roots.len(),
            files_scanned: plan.files_scanned,
            files_selected: plan.files_selected() + plan.failures.len(),
            ..RunReport::default()
        };
        for failure in plan.failures {
            report.fail(failure.unit, failure.target, failure.error);
        }
        reporter.on_run_start(plan.roots.len());

        let relocator = Relocator::default();
        let archiver = Archiver::default();
        let mut built = Vec::new();
        for batch in plan.batches {
            let moved = self.stage_batch(reporter, &relocator, &batch, &mut report);
            if moved == 0 {
                info!(
                    "Nothing moved into {}, no archive built",
                    batch.staging_dir.display()
                );
                continue;
            }
            match archiver.archive(&batch.staging_dir, &batch.archive_path) {
                Ok(summary) => {
                    report.archives_built += 1;
                    report.archives.push(summary.path.clone());
                    reporter.on_archive_complete(
                        &batch.archive_name,
                        summary.files,
                        summary.bytes,
                    );
                    built.push(batch);
                }
                Err(err) => {
                    error!(
                        "Archiving {} into {} failed: {}",
                        batch.staging_dir.display(),
                        batch.archive_path.display(),
                        err
                    );
                    report.fail(
                        FailureUnit::Archive,
                        batch.archive_path.display().to_string(),
                        err,
                    );
                }
            }
        }

        self.deliver(reporter, &built, &placeholders, &mut report);

        report.duration = start.elapsed();
        reporter.on_run_complete(report.duration.as_secs_f64());
        info!(
            "Run finished in {:.2}s: {} file(s) moved, {} archive(s), {} delivered, {} failure(s)",
            report.duration.as_secs_f64(),
            report.files_moved,
            report.archives_built,
            report.uploads_delivered,
            report.failures.len()
        );
        Ok(report)
    }

    /// Relocate every entry of `batch`, returning how many files moved.
    fn stage_batch(
        &self,
        reporter: &dyn ProgressReporter,
        relocator: &Relocator,
        batch: &PlannedBatch,
        report: &mut RunReport,
    ) -> usize {
        reporter.on_batch_start(&batch.archive_name, batch.entries.len());
        let mut moved = 0;
        for entry in &batch.entries {
            let source = entry.candidate.path.display().to_string();
            match relocator.relocate(entry) {
                Ok(outcome) => {
                    moved += 1;
                    report.files_moved += 1;
                    if !outcome.source_removed {
                        report.sources_left_behind += 1;
                    }
                    debug!("Staged {} as {}", source, entry.staging.display());
                    reporter.on_file_staged(report.files_moved, &source);
                }
                Err(err) => {
                    error!("Relocating {} failed, source kept: {}", source, err);
                    report.fail(FailureUnit::File, source, err);
                }
            }
        }
        reporter.on_batch_complete(&batch.archive_name, moved, batch.entries.len() - moved);
        moved
    }

    fn deliver(
        &self,
        reporter: &dyn ProgressReporter,
        batches: &[PlannedBatch],
        placeholders: &Placeholders,
        report: &mut RunReport,
    ) {
        if batches.is_empty() {
            return;
        }
        let Some(ftp) = self.config.ftp.as_ref() else {
            for batch in batches {
                info!(
                    "Dry run: would upload {} (no remote configured)",
                    batch.archive_path.display()
                );
                report.uploads_planned += 1;
            }
            return;
        };
        let remote_dir = placeholders.resolve(&ftp.remote_dir);

        if self.config.dry_run {
            for batch in batches {
                info!(
                    "Dry run: would upload {} to {}:{}{}",
                    batch.archive_path.display(),
                    ftp.host,
                    ftp.port,
                    normalize_remote_dir(&remote_dir)
                );
                report.uploads_planned += 1;
            }
            return;
        }

        let uploader = Uploader::new(
            self.connector.as_ref(),
            ftp.endpoint(),
            ftp.retry_policy(),
            self.sleeper.as_ref(),
        );
        for batch in batches {
            reporter.on_upload_start(&batch.archive_name);
            let outcome = uploader.upload(UploadTask {
                archive: batch.archive_path.clone(),
                remote_dir: remote_dir.clone(),
            });
            reporter.on_upload_complete(&batch.archive_name, outcome.succeeded(), outcome.attempts);
            match outcome.result {
                Ok(_) => {
                    report.uploads_delivered += 1;
                    if self.config.cleanup_after_upload {
                        cleanup(batch);
                    }
                }
                Err(err) => report.fail(
                    FailureUnit::Upload,
                    batch.archive_path.display().to_string(),
                    err,
                ),
            }
        }
    }
}

fn cleanup(batch: &PlannedBatch) {
    if let Err(err) = fs::remove_dir_all(&batch.staging_dir) {
        warn!(
            "Could not remove staging directory {}: {}",
            batch.staging_dir.display(),
            err
        );
    }
    if let Err(err) = fs::remove_file(&batch.archive_path) {
        warn!(
            "Could not remove archive {}: {}",
            batch.archive_path.display(),
            err
        );
    }
    debug!("Cleaned up {}", batch.staging_dir.display());
}

/// `name`, or `name_2`, `name_3`... when already taken.
fn unique_name(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", name, n);
        if used.insert(candidate.clone()) {
            warn!("Name {} already used in this run, using {}", name, candidate);
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name() {
        let mut used = HashSet::new();
        assert_eq!(unique_name(&mut used, "A".into()), "A");
        assert_eq!(unique_name(&mut used, "A".into()), "A_2");
        assert_eq!(unique_name(&mut used, "A".into()), "A_3");
        assert_eq!(unique_name(&mut used, "B".into()), "B");
    }

    #[test]
    fn test_report_counts_failures_by_unit() {
        let mut report = RunReport::default();
        report.fail(FailureUnit::File, "/in/a.log", "denied");
        report.fail(FailureUnit::Upload, "/out/a.zip", "530");
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.uploads_failed, 1);
        assert_eq!(report.archives_failed, 0);
        assert!(report.has_failures());
        assert_eq!(report.failures[1].unit.to_string(), "upload");
    }
}
