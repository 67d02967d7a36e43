use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::scanner::{Candidate, ScanRoot};

/// A selected file with its relative path and resolved destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    pub candidate: Candidate,
    /// Path below its own scan root, never an ancestor of it.
    pub relative: PathBuf,
    pub staging: PathBuf,
    pub backup: Option<PathBuf>,
}

impl StagingEntry {
    /// Every destination the file must reach before the source may be removed.
    pub fn destinations(&self) -> Vec<&Path> {
        let mut out = vec![self.staging.as_path()];
        if let Some(backup) = &self.backup {
            out.push(backup.as_path());
        }
        out
    }
}

/// Computes staging and backup destinations for the candidates of one scan root.
#[derive(Debug, Clone)]
pub struct StagingPlanner {
    /// Staging directory of the batch, plus an optional per-root subfolder for merged batches.
    staging_dir: PathBuf,
}

impl StagingPlanner {
    pub fn new(batch_dir: &Path, root_subfolder: Option<&str>) -> Self {
        let staging_dir = match root_subfolder {
            Some(sub) => join_relative(batch_dir, Path::new(sub)),
            None => batch_dir.to_path_buf(),
        };
        Self { staging_dir }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn plan(&self, root: &ScanRoot, candidate: Candidate) -> Result<StagingEntry> {
        let relative = relative_path(&root.path, &candidate.path)?;
        Ok(StagingEntry {
            staging: join_relative(&self.staging_dir, &relative),
            backup: root.backup.as_ref().map(|b| join_relative(b, &relative)),
            relative,
            candidate,
        })
    }
}

/// `path - root`, rebuilt from normal components only.
pub fn relative_path(root: &Path, path: &Path) -> Result<PathBuf> {
    let stripped = path.strip_prefix(root).map_err(|_| {
        Error::path(
            path,
            format!("not located under scan root {}", root.display()),
        )
    })?;

    let mut relative = PathBuf::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::path(path, "relative path escapes its scan root"));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(Error::path(path, "file is the scan root itself"));
    }
    Ok(relative)
}

fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    let mut out = base.to_path_buf();
    for part in relative.components() {
        if let Component::Normal(part) = part {
            out.push(part);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::RootOrigin;
    use std::time::SystemTime;

    fn root(path: &str, backup: Option<&str>) -> ScanRoot {
        ScanRoot {
            path: PathBuf::from(path),
            origin: RootOrigin::Literal,
            backup: backup.map(PathBuf::from),
            label: "in".into(),
        }
    }

    fn candidate(path: &str) -> Candidate {
        Candidate {
            path: PathBuf::from(path),
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_plan_preserves_structure() {
        let planner = StagingPlanner::new(Path::new("/stage/A_20260101"), None);
        let entry = planner
            .plan(&root("/data/A", Some("/bak/A")), candidate("/data/A/sub/x.log"))
            .unwrap();
        assert_eq!(entry.relative, PathBuf::from("sub/x.log"));
        assert_eq!(entry.staging, PathBuf::from("/stage/A_20260101/sub/x.log"));
        assert_eq!(entry.backup, Some(PathBuf::from("/bak/A/sub/x.log")));
        assert_eq!(entry.destinations().len(), 2);
    }

    #[test]
    fn test_merged_batch_uses_root_subfolder() {
        let planner = StagingPlanner::new(Path::new("/stage/host_2026"), Some("t1"));
        let a = planner
            .plan(&root("/data/t1", None), candidate("/data/t1/x.log"))
            .unwrap();
        assert_eq!(a.staging, PathBuf::from("/stage/host_2026/t1/x.log"));
        assert_eq!(a.destinations(), vec![Path::new("/stage/host_2026/t1/x.log")]);
    }

    #[test]
    fn test_relative_path_rejects_foreign_files() {
        assert!(relative_path(Path::new("/data/A"), Path::new("/data/B/x.log")).is_err());
        assert!(relative_path(Path::new("/data/A"), Path::new("/data/A")).is_err());
    }
}
