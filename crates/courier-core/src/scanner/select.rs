use regex::Regex;
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::glob::{compile_globs, matches_any};
use super::{Candidate, ScanRoot};
use crate::error::Result;
use crate::policy::SelectionPolicy;

#[derive(Debug, Clone)]
pub struct SelectOptions {
    /// Directory levels below the root to descend into; negative means unbounded.
    pub max_depth: i32,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub policy: SelectionPolicy,
}

/// Walks a scan root and filters files by name and eligibility policy.
#[derive(Debug, Clone)]
pub struct FileSelector {
    max_depth: i32,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    policy: SelectionPolicy,
}

#[derive(Debug, Default)]
pub struct Selection {
    pub selected: Vec<Candidate>,
    pub scanned: usize,
    pub not_eligible: usize,
}

impl FileSelector {
    pub fn new(options: &SelectOptions) -> Result<Self> {
        Ok(Self {
            max_depth: options.max_depth,
            include: compile_globs(&options.include)?,
            exclude: compile_globs(&options.exclude)?,
            policy: options.policy.clone(),
        })
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Enumerate and filter the files under `root`.
    pub fn select(&self, root: &ScanRoot, now: SystemTime) -> Selection {
        let candidates = self.enumerate(root);
        self.filter(candidates, now)
    }

    /// Regular files under `root` up to the configured depth, in sorted walk order.
    ///
    /// Unreadable directories contribute no files and are not reported as errors.
    /// Symbolic links are followed.
    pub fn enumerate(&self, root: &ScanRoot) -> Vec<Candidate> {
        let mut walker = WalkDir::new(&root.path)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        if self.max_depth >= 0 {
            // Files directly in the root sit at walk depth 1.
            walker = walker.max_depth(self.max_depth as usize + 1);
        }

        let mut candidates = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Unreadable entry under {}: {}", root.path.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = match entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|m| m.modified())
            {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(
                        "Cannot read modification time of {}: {}",
                        entry.path().display(),
                        err
                    );
                    continue;
                }
            };
            candidates.push(Candidate {
                path: entry.into_path(),
                modified,
            });
        }
        candidates
    }

    /// Apply include, then exclude, then the eligibility policy.
    pub fn filter(&self, candidates: Vec<Candidate>, now: SystemTime) -> Selection {
        let mut selection = Selection {
            scanned: candidates.len(),
            ..Selection::default()
        };

        for candidate in candidates {
            let name = match candidate.path.file_name() {
                Some(name) => name.to_string_lossy(),
                None => continue,
            };
            if !self.matches_name(&name) {
                continue;
            }
            if !self.policy.is_eligible(candidate.modified, now) {
                debug!("Not eligible yet: {}", candidate.path.display());
                selection.not_eligible += 1;
                continue;
            }
            selection.selected.push(candidate);
        }
        selection
    }

    /// An empty include list selects nothing; any exclude match rejects.
    pub fn matches_name(&self, name: &str) -> bool {
        matches_any(name, &self.include) && !matches_any(name, &self.exclude)
    }
}
