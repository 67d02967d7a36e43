use chrono::{DateTime, Local};

const ARCHIVE_EXTENSION: &str = ".zip";

/// Values substituted into path and name templates for one run.
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub hostname: String,
    pub started_at: DateTime<Local>,
}

impl Placeholders {
    pub fn new(hostname: impl Into<String>, started_at: DateTime<Local>) -> Self {
        Self {
            hostname: hostname.into(),
            started_at,
        }
    }

    /// Replace `{hostname}` and the timestamp placeholders. Unknown braces are left alone.
    pub fn resolve(&self, template: &str) -> String {
        // Longest timestamp token first so `{yyyyMMddHH}` never eats part of a longer one.
        template
            .replace("{hostname}", &self.hostname)
            .replace(
                "{yyyyMMddHHmmss}",
                &self.started_at.format("%Y%m%d%H%M%S").to_string(),
            )
            .replace("{yyyyMMddHH}", &self.started_at.format("%Y%m%d%H").to_string())
            .replace("{yyyyMMdd}", &self.started_at.format("%Y%m%d").to_string())
    }

    /// Resolve a per-root template, which additionally understands `{root}`.
    pub fn resolve_for_root(&self, template: &str, root_name: &str) -> String {
        self.resolve(&template.replace("{root}", root_name))
    }
}

/// Split an archive template result into `(archive file name, batch folder name)`.
/// `.zip` is appended when missing; the batch name is the archive name without it.
pub fn archive_and_batch_names(resolved: &str) -> (String, String) {
    let archive = if resolved.to_lowercase().ends_with(ARCHIVE_EXTENSION) {
        resolved.to_string()
    } else {
        format!("{}{}", resolved, ARCHIVE_EXTENSION)
    };
    let batch = archive[..archive.len() - ARCHIVE_EXTENSION.len()].to_string();
    (archive, batch)
}
