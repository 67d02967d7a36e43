use regex::Regex;
use tracing::error;

use crate::error::{Error, Result};

/// Translate a filename glob into an anchored regex source.
///
/// `*` matches any run of characters, `?` matches exactly one; every other
/// character is taken literally.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut literal = [0u8; 4];
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut literal))),
        }
    }
    out.push('$');
    out
}

/// Compile a glob list, skipping blank entries.
pub fn compile_globs(globs: &[String]) -> Result<Vec<Regex>> {
    globs
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .map(|g| {
            Regex::new(&glob_to_regex(g)).map_err(|e| {
                error!("Invalid glob pattern '{}': {}", g, e);
                Error::Config(format!("invalid glob pattern '{}': {}", g, e))
            })
        })
        .collect()
}

/// Compile a user supplied directory-name regex so that it must match the whole name.
pub fn compile_full_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| Error::Config(format!("invalid regex '{}': {}", pattern, e)))
}

pub fn matches_any(name: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|p| p.is_match(name))
}
