use anyhow::{Context, Result};
use courier_core::config::{LogRotation, LogSettings};
use std::env;
use std::fs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const FILE_PREFIX: &str = "courier";
const FILE_SUFFIX: &str = "log";

/// Console and rolling-file logging for one run. Dropping it flushes the file writer.
pub struct Logging {
    guard: WorkerGuard,
}

impl Logging {
    /// `TRACING_LEVEL` takes precedence over `log.level`.
    pub fn init(settings: &LogSettings) -> Result<Self> {
        let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| settings.level.clone());
        let filter_layer = EnvFilter::try_new(&filter)
            .with_context(|| format!("invalid log filter '{}'", filter))?;

        fs::create_dir_all(&settings.dir)
            .with_context(|| format!("creating log directory {}", settings.dir.display()))?;

        let mut builder = RollingFileAppender::builder()
            .rotation(rotation(settings.rotation))
            .filename_prefix(FILE_PREFIX)
            .filename_suffix(FILE_SUFFIX);
        if let Some(max_files) = settings.max_files {
            builder = builder.max_log_files(max_files);
        }
        let file_appender = builder
            .build(&settings.dir)
            .with_context(|| format!("opening log file in {}", settings.dir.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(false)
                    .with_ansi(true),
            )
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .with(filter_layer)
            .try_init()
            .context("installing the tracing subscriber")?;

        info!(
            "Tracing is configured for stdout and {}/{}.*.{}",
            settings.dir.display(),
            FILE_PREFIX,
            FILE_SUFFIX
        );
        Ok(Self { guard })
    }

    /// Flush pending file output and stop the writer thread.
    pub fn shutdown(self) {
        drop(self.guard);
    }
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Never => Rotation::NEVER,
    }
}
