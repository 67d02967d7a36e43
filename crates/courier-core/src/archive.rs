use chrono::{DateTime, Datelike, Local, Timelike};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::scanner::expand::normalize_separators;

const FILE_PERMISSIONS: u32 = 0o644;
const DIR_PERMISSIONS: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    EmptyDir,
}

/// One archive member, in the order it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    /// Path below the staged root, `/`-separated; directory entries end with `/`.
    pub name: String,
    pub source: PathBuf,
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub files: usize,
    pub empty_dirs: usize,
    pub bytes: u64,
}

/// Packages a staged directory tree into one zip archive.
///
/// Within each directory, subdirectories come before files, then names are compared
/// case-insensitively (ties broken by exact name). Entry timestamps come from the
/// staged files and permissions are fixed, so an unmodified tree always produces
/// the same bytes.
#[derive(Debug, Clone)]
pub struct Archiver {
    compression: CompressionMethod,
}

impl Default for Archiver {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl Archiver {
    /// Snapshot the staged tree into an ordered entry list.
    pub fn plan(&self, root: &Path) -> Result<Vec<PlannedEntry>> {
        let meta = fs::metadata(root).map_err(|e| Error::path(root, e.to_string()))?;
        if !meta.is_dir() {
            return Err(Error::path(root, "archive source is not a directory"));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root).min_depth(1).sort_by(compare_entries);
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                Error::io("walk", path, io::Error::from(e))
            })?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| Error::path(entry.path(), "outside the archive root"))?;
            let name = normalize_separators(relative);

            if entry.file_type().is_dir() {
                let is_empty = fs::read_dir(entry.path())
                    .map_err(|e| Error::io("read directory", entry.path(), e))?
                    .next()
                    .is_none();
                if is_empty {
                    entries.push(PlannedEntry {
                        name: format!("{}/", name),
                        source: entry.into_path(),
                        kind: EntryKind::EmptyDir,
                        modified: None,
                    });
                }
            } else if entry.file_type().is_file() {
                let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
                entries.push(PlannedEntry {
                    name,
                    source: entry.into_path(),
                    kind: EntryKind::File,
                    modified,
                });
            } else {
                warn!("Skipping non-regular entry {}", entry.path().display());
            }
        }
        Ok(entries)
    }

    /// Archive `root` into `dest`. The archive is written beside `dest` under a
    /// temporary name and renamed once complete.
    pub fn archive(&self, root: &Path, dest: &Path) -> Result<ArchiveSummary> {
        let entries = self.plan(root)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
        }
        let temp = temp_path(dest);
        let summary = match self.write_entries(&entries, &temp) {
            Ok((files, empty_dirs, bytes)) => ArchiveSummary {
                path: dest.to_path_buf(),
                files,
                empty_dirs,
                bytes,
            },
            Err(err) => {
                let _ = fs::remove_file(&temp);
                return Err(err);
            }
        };
        fs::rename(&temp, dest).map_err(|e| {
            let _ = fs::remove_file(&temp);
            Error::io("rename archive", dest, e)
        })?;

        info!(
            "Archived {} files and {} empty directories from {} into {}",
            summary.files,
            summary.empty_dirs,
            root.display(),
            dest.display()
        );
        Ok(summary)
    }

    fn write_entries(&self, entries: &[PlannedEntry], temp: &Path) -> Result<(usize, usize, u64)> {
        let file = File::create(temp).map_err(|e| Error::io("create archive", temp, e))?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let zip_err = |source: zip::result::ZipError| Error::Archive {
            path: temp.to_path_buf(),
            source,
        };

        let (mut files, mut empty_dirs, mut bytes) = (0usize, 0usize, 0u64);
        for entry in entries {
            match entry.kind {
                EntryKind::EmptyDir => {
                    let options = SimpleFileOptions::default()
                        .unix_permissions(DIR_PERMISSIONS)
                        .last_modified_time(zip::DateTime::default());
                    zip.add_directory(entry.name.as_str(), options)
                        .map_err(zip_err)?;
                    empty_dirs += 1;
                }
                EntryKind::File => {
                    let options = SimpleFileOptions::default()
                        .compression_method(self.compression)
                        .unix_permissions(FILE_PERMISSIONS)
                        .last_modified_time(zip_timestamp(entry.modified));
                    zip.start_file(entry.name.as_str(), options)
                        .map_err(zip_err)?;
                    let source = File::open(&entry.source)
                        .map_err(|e| Error::io("open", &entry.source, e))?;
                    bytes += io::copy(&mut BufReader::new(source), &mut zip)
                        .map_err(|e| Error::io("read", &entry.source, e))?;
                    files += 1;
                }
            }
            debug!("Added {}", entry.name);
        }

        let mut writer = zip.finish().map_err(zip_err)?;
        writer.flush().map_err(|e| Error::io("flush archive", temp, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::io("sync archive", temp, e))?;
        Ok((files, empty_dirs, bytes))
    }
}

/// Entry names of an existing archive, in stored order.
pub fn list_entries(archive: &Path) -> Result<Vec<String>> {
    let file = File::open(archive).map_err(|e| Error::io("open archive", archive, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|source| Error::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut names = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i).map_err(|source| Error::Archive {
            path: archive.to_path_buf(),
            source,
        })?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}

fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    let a_dir = a.file_type().is_dir();
    let b_dir = b.file_type().is_dir();
    b_dir.cmp(&a_dir).then_with(|| {
        let a_name = a.file_name().to_string_lossy();
        let b_name = b.file_name().to_string_lossy();
        a_name
            .to_lowercase()
            .cmp(&b_name.to_lowercase())
            .then_with(|| a_name.cmp(&b_name))
    })
}

fn zip_timestamp(modified: Option<SystemTime>) -> zip::DateTime {
    modified
        .and_then(|m| {
            let local: DateTime<Local> = m.into();
            zip::DateTime::from_date_and_time(
                u16::try_from(local.year()).ok()?,
                local.month() as u8,
                local.day() as u8,
                local.hour() as u8,
                local.minute() as u8,
                local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}
