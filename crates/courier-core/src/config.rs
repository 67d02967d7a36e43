use chrono::{DateTime, Local, NaiveDateTime};
use config::{Config, Environment, File as ConfigFile, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::policy::{SelectionPolicy, WindowSpec};
use crate::scanner::expand::parse_spec;
use crate::scanner::{ExpandOptions, RootOrigin, RootSpec};
use crate::template::Placeholders;
use crate::transfer::{Endpoint, RetryPolicy, TransferMode};

const DEFAULT_SECTION: &str = "default";
const HOSTS_SECTION: &str = "hosts";
const ENV_PREFIX: &str = "COURIER";
const WINDOW_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One batch for the whole run; every scan root gets its own subfolder in it.
    Merged,
    /// One batch and one archive per scan root.
    PerRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PolicyKind {
    StableAge,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WindowKind {
    PreviousDay,
    PreviousHour,
    CurrentDay,
    Explicit,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    watch_dirs: Vec<String>,
    #[serde(default)]
    backup_dirs: Vec<String>,
    backup_base_dir: Option<String>,
    #[serde(default)]
    include_patterns: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
    #[serde(default)]
    recursive: bool,
    files_max_depth: Option<i32>,
    #[serde(default)]
    expand: RawExpand,
    #[serde(default)]
    selection: RawSelection,
    #[serde(default = "default_grouping")]
    grouping: Grouping,
    staging_base_dir: Option<String>,
    output_dir: Option<String>,
    #[serde(default = "default_archive_name")]
    archive_name: String,
    #[serde(default = "default_per_root_name")]
    per_root_name: String,
    #[serde(default)]
    ftp: RawFtp,
    #[serde(default)]
    cleanup_after_upload: bool,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    log: RawLog,
}

#[derive(Debug, Deserialize)]
struct RawExpand {
    #[serde(default = "default_expand_depth")]
    depth: i32,
    #[serde(default = "default_include_regex")]
    include_regex: String,
    exclude_regex: Option<String>,
}

impl Default for RawExpand {
    fn default() -> Self {
        Self {
            depth: default_expand_depth(),
            include_regex: default_include_regex(),
            exclude_regex: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSelection {
    #[serde(default = "default_policy")]
    policy: PolicyKind,
    #[serde(default = "default_min_age_secs")]
    min_age_secs: u64,
    #[serde(default = "default_window")]
    window: WindowKind,
    start: Option<String>,
    end: Option<String>,
}

impl Default for RawSelection {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            min_age_secs: default_min_age_secs(),
            window: default_window(),
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawFtp {
    host: Option<String>,
    #[serde(default = "default_ftp_port")]
    port: u16,
    user: Option<String>,
    password: Option<String>,
    remote_dir: Option<String>,
    #[serde(default = "default_true")]
    passive: bool,
    #[serde(default = "default_timeout_ms")]
    connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    data_timeout_ms: u64,
    #[serde(default = "default_max_retry")]
    max_retry: u32,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    #[serde(default = "default_log_dir")]
    dir: String,
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default = "default_rotation")]
    rotation: LogRotation,
    max_files: Option<usize>,
}

impl Default for RawLog {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
            rotation: default_rotation(),
            max_files: None,
        }
    }
}

fn default_grouping() -> Grouping {
    Grouping::Merged
}
fn default_archive_name() -> String {
    "{hostname}_{yyyyMMddHH}.zip".to_string()
}
fn default_per_root_name() -> String {
    "{root}_{yyyyMMdd}".to_string()
}
fn default_expand_depth() -> i32 {
    1
}
fn default_include_regex() -> String {
    ".*".to_string()
}
fn default_policy() -> PolicyKind {
    PolicyKind::StableAge
}
fn default_min_age_secs() -> u64 {
    120
}
fn default_window() -> WindowKind {
    WindowKind::PreviousDay
}
fn default_ftp_port() -> u16 {
    21
}
fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retry() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    3_000
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_rotation() -> LogRotation {
    LogRotation::Daily
}

/// Which eligibility rule the run applies, before it is resolved against the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionConfig {
    StableAge { min_age: Duration },
    Window(WindowSpec),
}

impl SelectionConfig {
    pub fn resolve(&self, now: DateTime<Local>) -> Result<SelectionPolicy> {
        match self {
            SelectionConfig::StableAge { min_age } => Ok(SelectionPolicy::StableAge {
                min_age: *min_age,
            }),
            SelectionConfig::Window(spec) => spec.resolve(now),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_dir: String,
    pub passive: bool,
    pub connect_timeout: Duration,
    pub data_timeout: Duration,
    pub max_retry: u32,
    pub retry_delay: Duration,
}

impl FtpSettings {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            mode: if self.passive {
                TransferMode::Passive
            } else {
                TransferMode::Active
            },
            connect_timeout: self.connect_timeout,
            data_timeout: self.data_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry, self.retry_delay)
    }
}

impl fmt::Debug for FtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"********")
            .field("remote_dir", &self.remote_dir)
            .field("passive", &self.passive)
            .field("connect_timeout", &self.connect_timeout)
            .field("data_timeout", &self.data_timeout)
            .field("max_retry", &self.max_retry)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub level: String,
    pub rotation: LogRotation,
    pub max_files: Option<usize>,
}

/// Validated settings for one host. Path values may still contain placeholders.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub hostname: String,
    pub watch_dirs: Vec<String>,
    pub backup_dirs: Vec<String>,
    pub backup_base_dir: Option<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub files_max_depth: i32,
    pub expand_depth: i32,
    pub expand_include_regex: String,
    pub expand_exclude_regex: Option<String>,
    pub selection: SelectionConfig,
    pub grouping: Grouping,
    pub staging_base_dir: String,
    pub output_dir: Option<String>,
    pub archive_name: String,
    pub per_root_name: String,
    /// Absent only in dry-run mode.
    pub ftp: Option<FtpSettings>,
    pub cleanup_after_upload: bool,
    pub dry_run: bool,
    pub log: LogSettings,
    /// Non-fatal problems found while loading, logged once logging is up.
    pub warnings: Vec<String>,
}

impl AppConfig {
    pub fn expand_options(&self) -> Result<ExpandOptions> {
        ExpandOptions::new(
            self.expand_depth,
            &self.expand_include_regex,
            self.expand_exclude_regex.as_deref(),
        )
    }

    /// Pair every watch spec with its backup root, resolving placeholders.
    ///
    /// `backup_dirs[i]` pairs with `watch_dirs[i]`. Specs without a pair fall back to
    /// `backup_base_dir`, under a subfolder named after the literal directory.
    pub fn root_specs(&self, placeholders: &Placeholders) -> Vec<RootSpec> {
        self.watch_dirs
            .iter()
            .enumerate()
            .map(|(i, dir)| {
                let spec = placeholders.resolve(dir);
                let paired = self
                    .backup_dirs
                    .get(i)
                    .map(|b| PathBuf::from(placeholders.resolve(b)));
                let backup = paired.or_else(|| {
                    self.backup_base_dir.as_ref().map(|base| {
                        let base = PathBuf::from(placeholders.resolve(base));
                        match parse_spec(&spec) {
                            RootOrigin::Literal => match Path::new(&spec).file_name() {
                                Some(name) => base.join(name),
                                None => base,
                            },
                            RootOrigin::Wildcard { .. } => base,
                        }
                    })
                });
                RootSpec { spec, backup }
            })
            .collect()
    }
}

/// Load `path`, merging `[default]` with `[hosts."<hostname>"]`, then apply
/// `COURIER__*` environment overrides. `force_dry_run` wins over the file.
pub fn load_configuration(path: &Path, hostname: &str, force_dry_run: bool) -> Result<AppConfig> {
    let text = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read config file {}: {}", path.display(), e))
    })?;
    build(&text, hostname, true, force_dry_run)
}

/// Same as [`load_configuration`] without the environment layer.
pub fn load_from_str(text: &str, hostname: &str) -> Result<AppConfig> {
    build(text, hostname, false, false)
}

fn build(text: &str, hostname: &str, with_env: bool, force_dry_run: bool) -> Result<AppConfig> {
    let mut warnings = Vec::new();
    let merged = merge_sections(text, hostname, &mut warnings)?;
    let merged_text = toml::to_string(&merged)
        .map_err(|e| Error::Config(format!("cannot re-encode merged settings: {}", e)))?;

    let mut builder =
        Config::builder().add_source(ConfigFile::from_str(&merged_text, FileFormat::Toml));
    if with_env {
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
    }
    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.dry_run |= force_dry_run;
    validate(raw, hostname, warnings)
}

/// Top-level keys, then `[default]`, then the matching host section, deep-merged in that order.
fn merge_sections(
    text: &str,
    hostname: &str,
    warnings: &mut Vec<String>,
) -> Result<toml::Table> {
    let mut document: toml::Table = text
        .parse()
        .map_err(|e| Error::Config(format!("invalid config file: {}", e)))?;

    let default = take_table(&mut document, DEFAULT_SECTION)?;
    let hosts = take_table(&mut document, HOSTS_SECTION)?;

    let mut merged = document;
    deep_merge(&mut merged, default);

    let host_section = hosts
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(hostname));
    match host_section {
        Some((_, toml::Value::Table(section))) => deep_merge(&mut merged, section),
        Some((name, _)) => {
            return Err(Error::Config(format!(
                "[{}.{}] must be a table",
                HOSTS_SECTION, name
            )))
        }
        None => warnings.push(format!(
            "no [{}.\"{}\"] section in config, using [{}] only",
            HOSTS_SECTION, hostname, DEFAULT_SECTION
        )),
    }
    Ok(merged)
}

fn take_table(document: &mut toml::Table, key: &str) -> Result<toml::Table> {
    match document.remove(key) {
        None => Ok(toml::Table::new()),
        Some(toml::Value::Table(table)) => Ok(table),
        Some(_) => Err(Error::Config(format!("[{}] must be a table", key))),
    }
}

fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn validate(raw: RawSettings, hostname: &str, mut warnings: Vec<String>) -> Result<AppConfig> {
    let watch_dirs = non_blank(raw.watch_dirs);
    if watch_dirs.is_empty() {
        return Err(Error::Config("watch_dirs is missing or empty".into()));
    }

    let backup_dirs = non_blank(raw.backup_dirs);
    if !backup_dirs.is_empty() && backup_dirs.len() != watch_dirs.len() {
        warnings.push(format!(
            "backup_dirs has {} entries but watch_dirs has {}; pairing by position where possible",
            backup_dirs.len(),
            watch_dirs.len()
        ));
    }
    let backup_base_dir = raw.backup_base_dir.filter(|s| !s.trim().is_empty());
    if backup_dirs.is_empty() && backup_base_dir.is_none() {
        warnings.push(
            "no backup_dirs or backup_base_dir configured, files are not backed up".into(),
        );
    }

    let include_patterns = non_blank(raw.include_patterns);
    if include_patterns.is_empty() {
        warnings.push("include_patterns is empty, no file will be selected".into());
    }

    let staging_base_dir = raw
        .staging_base_dir
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::Config("staging_base_dir is required".into()))?;

    let selection = match raw.selection.policy {
        PolicyKind::StableAge => SelectionConfig::StableAge {
            min_age: Duration::from_secs(raw.selection.min_age_secs),
        },
        PolicyKind::Window => SelectionConfig::Window(window_spec(&raw.selection)?),
    };

    // Fail on bad regexes now rather than mid-run.
    let expand = raw.expand;
    ExpandOptions::new(
        expand.depth,
        &expand.include_regex,
        expand.exclude_regex.as_deref(),
    )?;

    let level = raw.log.level.trim().to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(Error::Config(format!("unknown log.level '{}'", raw.log.level)));
    }

    let ftp = ftp_settings(raw.ftp, raw.dry_run)?;

    Ok(AppConfig {
        hostname: hostname.to_string(),
        watch_dirs,
        backup_dirs,
        backup_base_dir,
        include_patterns,
        exclude_patterns: non_blank(raw.exclude_patterns),
        files_max_depth: raw
            .files_max_depth
            .unwrap_or(if raw.recursive { -1 } else { 0 }),
        expand_depth: expand.depth,
        expand_include_regex: expand.include_regex,
        expand_exclude_regex: expand.exclude_regex.filter(|s| !s.trim().is_empty()),
        selection,
        grouping: raw.grouping,
        staging_base_dir,
        output_dir: raw.output_dir.filter(|s| !s.trim().is_empty()),
        archive_name: raw.archive_name,
        per_root_name: raw.per_root_name,
        ftp,
        cleanup_after_upload: raw.cleanup_after_upload,
        dry_run: raw.dry_run,
        log: LogSettings {
            dir: PathBuf::from(raw.log.dir),
            level,
            rotation: raw.log.rotation,
            max_files: raw.log.max_files,
        },
        warnings,
    })
}

fn window_spec(selection: &RawSelection) -> Result<WindowSpec> {
    Ok(match selection.window {
        WindowKind::PreviousDay => WindowSpec::PreviousDay,
        WindowKind::PreviousHour => WindowSpec::PreviousHour,
        WindowKind::CurrentDay => WindowSpec::CurrentDay,
        WindowKind::Explicit => {
            let start = parse_window_time("selection.start", selection.start.as_deref())?;
            let end = parse_window_time("selection.end", selection.end.as_deref())?;
            if start >= end {
                return Err(Error::Config(format!(
                    "selection.start {} must be before selection.end {}",
                    start, end
                )));
            }
            WindowSpec::Explicit { start, end }
        }
    })
}

fn parse_window_time(key: &str, value: Option<&str>) -> Result<NaiveDateTime> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{} is required for an explicit window", key)))?;
    WINDOW_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(|| {
            Error::Config(format!(
                "{} '{}' is not in YYYY-MM-DD HH:MM:SS form",
                key, value
            ))
        })
}

fn ftp_settings(raw: RawFtp, dry_run: bool) -> Result<Option<FtpSettings>> {
    let required = [
        ("ftp.host", &raw.host),
        ("ftp.user", &raw.user),
        ("ftp.password", &raw.password),
        ("ftp.remote_dir", &raw.remote_dir),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, v)| v.as_deref().map_or(true, |s| s.trim().is_empty()))
        .map(|(k, _)| *k)
        .collect();

    if !missing.is_empty() {
        if dry_run {
            return Ok(None);
        }
        return Err(Error::Config(format!("missing {}", missing.join(", "))));
    }
    if raw.max_retry == 0 {
        return Err(Error::Config("ftp.max_retry must be at least 1".into()));
    }

    Ok(Some(FtpSettings {
        host: raw.host.unwrap_or_default().trim().to_string(),
        port: raw.port,
        user: raw.user.unwrap_or_default(),
        password: raw.password.unwrap_or_default(),
        remote_dir: raw.remote_dir.unwrap_or_default(),
        passive: raw.passive,
        connect_timeout: Duration::from_millis(raw.connect_timeout_ms),
        data_timeout: Duration::from_millis(raw.data_timeout_ms),
        max_retry: raw.max_retry,
        retry_delay: Duration::from_millis(raw.retry_delay_ms),
    }))
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
