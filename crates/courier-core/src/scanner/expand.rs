use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::glob::compile_full_match;
use super::{RootOrigin, RootSpec, ScanRoot};
use crate::error::Result;

const WILDCARD_SEGMENT: &str = "*";

/// Subdirectory filters applied while expanding wildcard specs.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Levels below the direct children that are also examined. Zero looks at direct
    /// children only; a negative value is unbounded.
    pub depth: i32,
    pub include: Regex,
    pub exclude: Option<Regex>,
}

impl ExpandOptions {
    pub fn new(depth: i32, include: &str, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            depth,
            include: compile_full_match(include)?,
            exclude: exclude.map(compile_full_match).transpose()?,
        })
    }

    /// Exclude is evaluated first; a directory must then match include.
    pub fn accepts(&self, name: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }
        self.include.is_match(name)
    }
}

/// Split a root spec into a literal directory or a wildcard parent.
pub fn parse_spec(spec: &str) -> RootOrigin {
    let path = Path::new(spec);
    match path.file_name() {
        Some(name) if name == WILDCARD_SEGMENT => RootOrigin::Wildcard {
            parent: match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            },
        },
        _ => RootOrigin::Literal,
    }
}

/// Resolve every spec into concrete scan roots, in spec order.
///
/// Invalid literal specs and missing wildcard parents are skipped with a warning.
pub fn expand_roots(specs: &[RootSpec], options: &ExpandOptions) -> Vec<ScanRoot> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut roots = Vec::new();

    for spec in specs {
        let resolved = match parse_spec(&spec.spec) {
            RootOrigin::Literal => literal_root(spec).into_iter().collect(),
            RootOrigin::Wildcard { parent } => expand_wildcard(spec, &parent, options),
        };

        for root in resolved {
            if seen.insert(root.path.clone()) {
                roots.push(root);
            } else {
                warn!(
                    "Scan root {} resolved more than once, keeping the first occurrence",
                    root.path.display()
                );
            }
        }
    }

    roots
}

fn literal_root(spec: &RootSpec) -> Option<ScanRoot> {
    let path = validate_dir(Path::new(&spec.spec))?;
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    Some(ScanRoot {
        path,
        origin: RootOrigin::Literal,
        backup: spec.backup.clone(),
        label,
    })
}

fn expand_wildcard(spec: &RootSpec, parent: &Path, options: &ExpandOptions) -> Vec<ScanRoot> {
    let parent = match validate_dir(parent) {
        Some(parent) => parent,
        None => return Vec::new(),
    };

    let mut roots = Vec::new();
    let mut walker = WalkDir::new(&parent)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if let Ok(depth) = usize::try_from(options.depth) {
        walker = walker.max_depth(depth + 1);
    }

    // Recursion continues below rejected directories; only membership is filtered.
    for entry in walker.into_iter().filter_map(|e| match e {
        Ok(entry) => Some(entry),
        Err(err) => {
            debug!("Skipping unreadable entry under {}: {}", parent.display(), err);
            None
        }
    }) {
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !options.accepts(&name) {
            debug!("Subdirectory {} filtered out", entry.path().display());
            continue;
        }

        let relative = match entry.path().strip_prefix(&parent) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        roots.push(ScanRoot {
            path: entry.path().to_path_buf(),
            origin: RootOrigin::Wildcard {
                parent: parent.clone(),
            },
            backup: spec.backup.as_ref().map(|b| b.join(&relative)),
            label: normalize_separators(&relative),
        });
    }

    if roots.is_empty() {
        warn!("Wildcard {} matched no subdirectories", spec.spec);
    }
    roots
}

fn validate_dir(path: &Path) -> Option<PathBuf> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => match fs::canonicalize(path) {
            Ok(abs) => Some(abs),
            Err(err) => {
                warn!("Cannot resolve scan root {}: {}", path.display(), err);
                None
            }
        },
        Ok(_) => {
            warn!("Scan root is not a directory, skipping: {}", path.display());
            None
        }
        Err(err) => {
            warn!("Scan root does not exist, skipping: {} ({})", path.display(), err);
            None
        }
    }
}

/// Join path components with `/` regardless of platform.
pub fn normalize_separators(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
