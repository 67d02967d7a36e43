pub mod expand;
pub mod glob;
pub mod select;

use std::path::PathBuf;
use std::time::SystemTime;

pub use expand::{expand_roots, ExpandOptions};
pub use select::{FileSelector, SelectOptions};

/// A configured root entry: literal directory or `parent/*`, with its paired backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSpec {
    pub spec: String,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootOrigin {
    Literal,
    Wildcard { parent: PathBuf },
}

/// A directory whose files are candidates for selection. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRoot {
    pub path: PathBuf,
    pub origin: RootOrigin,
    pub backup: Option<PathBuf>,
    /// Directory name for literal roots, `/`-joined path below the wildcard
    /// parent for expanded roots. Used to name the root's staging subfolder.
    pub label: String,
}

/// A regular file found under a scan root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub modified: SystemTime,
}
