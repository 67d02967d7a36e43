use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Path error: {}: {reason}", path.display())]
    Path { path: PathBuf, reason: String },

    #[error("IO error during {op} on {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive error on {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Protocol error during {op}: {detail}")]
    Protocol { op: &'static str, detail: String },
}

impl Error {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(op: &'static str, detail: impl ToString) -> Self {
        Error::Protocol {
            op,
            detail: detail.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
