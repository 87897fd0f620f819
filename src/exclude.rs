//! Exclude patterns.
//!
//! Patterns are handed to the archiver in its own syntax. They are not
//! translated between formats, so a pattern written for `tar` may match
//! differently under `zip` or `7z`.

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Exclude option dialect of an archiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// `-x p1 p2 ...`, placed after the inputs.
    Zip,
    /// `--exclude=p` per pattern, placed before `-cf`.
    Tar,
    /// `-x!p` per pattern.
    SevenZip,
}

impl Syntax {
    /// Renders `patterns` as archiver arguments. Empty input yields no arguments.
    pub fn to_args(self, patterns: &[String]) -> Vec<OsString> {
        if patterns.is_empty() {
            return vec![];
        }
        match self {
            Syntax::Zip => std::iter::once(OsString::from("-x"))
                .chain(patterns.iter().map(OsString::from))
                .collect(),
            Syntax::Tar => patterns
                .iter()
                .map(|p| OsString::from(format!("--exclude={p}")))
                .collect(),
            Syntax::SevenZip => patterns
                .iter()
                .map(|p| OsString::from(format!("-x!{p}")))
                .collect(),
        }
    }
}

/// Combines inline patterns with the lines of `exclude_file`.
///
/// Inline patterns come first, in order. A configured file that cannot be
/// read is logged and ignored.
pub fn resolve(inline: &[String], exclude_file: Option<&Path>) -> Vec<String> {
    let mut patterns = inline.to_vec();
    if let Some(path) = exclude_file {
        match fs::read_to_string(path) {
            Ok(text) => patterns.extend(parse_exclude_lines(&text)),
            Err(e) => warn!("Exclude file '{}' not found or unreadable: {e}", path.display()),
        }
    }
    patterns
}

/// Trimmed, non-blank, non-comment lines of an exclude file.
pub fn parse_exclude_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
}

/// One-line description of the active patterns for the dry-run report.
pub fn preview(patterns: &[String]) -> String {
    if patterns.is_empty() {
        return "none".to_string();
    }
    format!("{} ({})", patterns.len(), patterns.join(", "))
}
