use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{debug, error, warn};

use super::plan::StagingEntry;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocated {
    /// False when every copy landed but the source could not be deleted afterwards.
    pub source_removed: bool,
}

/// Moves a staged file to all of its destinations, all-or-nothing per file.
///
/// Every destination but the last receives a copy; the last one is reached with a
/// native rename, falling back to copy-then-delete when the rename fails (for
/// example across devices). The source is never removed unless every destination
/// holds the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Relocator;

impl Relocator {
    pub fn relocate(&self, entry: &StagingEntry) -> Result<Relocated> {
        self.relocate_with(
            entry,
            |from, to| fs::rename(from, to),
            |path| fs::remove_file(path),
        )
    }

    fn relocate_with(
        &self,
        entry: &StagingEntry,
        rename: impl Fn(&Path, &Path) -> io::Result<()>,
        remove: impl Fn(&Path) -> io::Result<()>,
    ) -> Result<Relocated> {
        let source = entry.candidate.path.as_path();
        let destinations = entry.destinations();
        let (last, copies) = match destinations.split_last() {
            Some(split) => split,
            None => return Err(Error::path(source, "no destination configured")),
        };

        let mut written: Vec<&Path> = Vec::with_capacity(destinations.len());
        for dest in copies {
            if let Err(err) = self.copy_file(entry, dest) {
                error!(
                    "Relocation of {} failed while copying to {}: {}",
                    source.display(),
                    dest.display(),
                    err
                );
                remove_partial(dest);
                rollback(&written);
                return Err(err);
            }
            written.push(*dest);
        }

        if let Err(err) = ensure_parent(last) {
            error!("Relocation of {} failed: {}", source.display(), err);
            rollback(&written);
            return Err(err);
        }
        match rename(source, last) {
            Ok(()) => {
                debug!("Renamed {} -> {}", source.display(), last.display());
                return Ok(Relocated {
                    source_removed: true,
                });
            }
            Err(err) => debug!(
                "Rename {} -> {} failed ({}), falling back to copy",
                source.display(),
                last.display(),
                err
            ),
        }

        if let Err(err) = self.copy_file(entry, last) {
            error!(
                "Relocation of {} failed while copying to {}: {}",
                source.display(),
                last.display(),
                err
            );
            remove_partial(last);
            rollback(&written);
            return Err(err);
        }

        match remove(source) {
            Ok(()) => Ok(Relocated {
                source_removed: true,
            }),
            Err(err) => {
                // A duplicate is preferred over losing the only copy.
                warn!(
                    "Copied {} to every destination but could not delete it: {}",
                    source.display(),
                    err
                );
                Ok(Relocated {
                    source_removed: false,
                })
            }
        }
    }

    fn copy_file(&self, entry: &StagingEntry, dest: &Path) -> Result<()> {
        let source = entry.candidate.path.as_path();
        ensure_parent(dest)?;
        fs::copy(source, dest).map_err(|e| Error::io("copy", source, e))?;
        OpenOptions::new()
            .write(true)
            .open(dest)
            .and_then(|f| f.sync_all())
            .map_err(|e| Error::io("sync", dest, e))?;

        let mtime = FileTime::from_system_time(entry.candidate.modified);
        if let Err(err) = filetime::set_file_mtime(dest, mtime) {
            warn!("Could not preserve mtime on {}: {}", dest.display(), err);
        }
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))
        }
        _ => Ok(()),
    }
}

fn remove_partial(path: &Path) {
    if path.is_file() {
        let _ = fs::remove_file(path);
    }
}

fn rollback(written: &[&Path]) {
    for dest in written {
        if let Err(err) = fs::remove_file(dest) {
            warn!("Rollback could not remove {}: {}", dest.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Candidate;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn entry(source: PathBuf, staging: PathBuf, backup: Option<PathBuf>) -> StagingEntry {
        StagingEntry {
            candidate: Candidate {
                modified: fs::metadata(&source).unwrap().modified().unwrap(),
                path: source,
            },
            relative: PathBuf::from("x.log"),
            staging,
            backup,
        }
    }

    #[test]
    fn test_relocates_to_all_destinations() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("in").join("x.log");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, "payload").unwrap();

        let staging = tmp.path().join("stage").join("b").join("x.log");
        let backup = tmp.path().join("bak").join("x.log");
        let e = entry(src.clone(), staging.clone(), Some(backup.clone()));

        let out = Relocator::default().relocate(&e).unwrap();
        assert!(out.source_removed);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&staging).unwrap(), "payload");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "payload");
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("x.log");
        fs::write(&src, "payload").unwrap();
        let past = SystemTime::now() - Duration::from_secs(86_400);
        filetime::set_file_mtime(&src, FileTime::from_system_time(past)).unwrap();

        let staging = tmp.path().join("stage").join("x.log");
        let backup = tmp.path().join("bak").join("x.log");
        let e = entry(src, staging.clone(), Some(backup));
        Relocator::default().relocate(&e).unwrap();

        let staged = FileTime::from_last_modification_time(&fs::metadata(&staging).unwrap());
        assert_eq!(staged.unix_seconds(), FileTime::from_system_time(past).unix_seconds());
    }

    fn cross_device(_: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "cross-device link"))
    }

    #[test]
    fn test_failed_rename_falls_back_to_copy_and_delete() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("x.log");
        fs::write(&src, "payload").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3_600);
        filetime::set_file_mtime(&src, FileTime::from_system_time(past)).unwrap();

        let staging = tmp.path().join("stage").join("x.log");
        let e = entry(src.clone(), staging.clone(), None);
        let out = Relocator::default()
            .relocate_with(&e, cross_device, |path| fs::remove_file(path))
            .unwrap();

        assert!(out.source_removed);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&staging).unwrap(), "payload");
        let staged = FileTime::from_last_modification_time(&fs::metadata(&staging).unwrap());
        assert_eq!(staged.unix_seconds(), FileTime::from_system_time(past).unix_seconds());
    }

    #[test]
    fn test_undeletable_source_is_reported_not_failed() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("x.log");
        fs::write(&src, "payload").unwrap();

        let staging = tmp.path().join("stage").join("x.log");
        let backup = tmp.path().join("bak").join("x.log");
        let e = entry(src.clone(), staging.clone(), Some(backup.clone()));
        let out = Relocator::default()
            .relocate_with(&e, cross_device, |_| {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
            })
            .unwrap();

        assert_eq!(
            out,
            Relocated {
                source_removed: false
            }
        );
        assert_eq!(fs::read_to_string(&src).unwrap(), "payload");
        assert_eq!(fs::read_to_string(&staging).unwrap(), "payload");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "payload");
    }

    #[test]
    fn test_failure_leaves_source_and_rolls_back() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("x.log");
        fs::write(&src, "payload").unwrap();

        // The backup parent is a regular file, so no directory can be created there.
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "not a dir").unwrap();
        let staging = tmp.path().join("stage").join("x.log");
        let backup = blocker.join("x.log");
        let e = entry(src.clone(), staging.clone(), Some(backup.clone()));

        assert!(Relocator::default().relocate(&e).is_err());
        assert_eq!(fs::read_to_string(&src).unwrap(), "payload");
        assert!(!staging.exists());
        assert!(!backup.exists());
    }

    #[test]
    fn test_failure_on_first_copy_keeps_source() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("x.log");
        fs::write(&src, "payload").unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let e = entry(
            src.clone(),
            blocker.join("x.log"),
            Some(tmp.path().join("bak").join("x.log")),
        );
        assert!(Relocator::default().relocate(&e).is_err());
        assert!(src.exists());
        assert!(!tmp.path().join("bak").join("x.log").exists());
    }
}
