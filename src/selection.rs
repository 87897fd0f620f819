//! Source selection, headless or through terminal prompts.

use crate::config::EffectiveConfig;
use crate::path_util::{absolutize, expand_path};
use anyhow::{Context, Result};
use dialoguer::{Input, MultiSelect, Select};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Ordered set of absolute source paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    paths: Vec<PathBuf>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `path` unless it is already selected.
    pub fn push(&mut self, path: PathBuf) {
        if !self.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Adds `path` if absent, otherwise removes it. Returns whether it is now selected.
    pub fn toggle(&mut self, path: &Path) -> bool {
        if self.contains(path) {
            self.paths.retain(|p| p != path);
            false
        } else {
            self.paths.push(path.to_path_buf());
            true
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Fills an empty selection from configured sources.
    ///
    /// Sources are expanded and made absolute; those that do not exist are
    /// skipped with a warning. A non-empty selection is left untouched.
    pub fn apply_sources(&mut self, sources: &[String]) {
        if !self.is_empty() {
            return;
        }
        for source in sources {
            let path = absolutize(&expand_path(source));
            if path.exists() {
                self.push(path);
            } else {
                warn!("Source not found, skipping: {}", path.display());
            }
        }
    }
}

/// Lets the user pick entries of `start_dir` with a multi-select prompt.
pub fn pick_interactive(start_dir: &Path) -> Result<SelectionSet> {
    let start_dir = absolutize(start_dir);
    let mut entries: Vec<PathBuf> = fs::read_dir(&start_dir)
        .with_context(|| format!("Cannot list '{}'", start_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let labels: Vec<String> = entries
        .iter()
        .map(|p| {
            let name = p.file_name().unwrap_or_default().to_string_lossy();
            if p.is_dir() {
                format!("{name}/")
            } else {
                name.into_owned()
            }
        })
        .collect();

    let chosen = MultiSelect::new()
        .with_prompt(format!("Select items in {} (space to toggle)", start_dir.display()))
        .items(&labels)
        .interact()?;

    let mut selection = SelectionSet::new();
    for index in chosen {
        selection.toggle(&entries[index]);
    }
    Ok(selection)
}

/// Asks where the archive goes: current directory, configured destination or a custom path.
pub fn choose_destination(config: &EffectiveConfig) -> Result<PathBuf> {
    let cwd = env::current_dir().context("Cannot determine the current directory")?;
    let items = [
        format!("Current directory ({})", cwd.display()),
        format!("Default destination ({})", config.dest_dir.display()),
        "Custom path".to_string(),
    ];
    let choice = Select::new()
        .with_prompt("Output directory")
        .items(&items)
        .default(1)
        .interact()?;

    let dir = match choice {
        0 => cwd,
        1 => config.dest_dir.clone(),
        _ => {
            let raw: String = Input::new().with_prompt("Path").interact_text()?;
            absolutize(&expand_path(raw.trim()))
        }
    };
    Ok(dir)
}

/// Asks for the archive base name; an empty answer keeps `default`.
pub fn choose_base_name(default: &str) -> Result<String> {
    let name: String = Input::new()
        .with_prompt(format!("Archive name (empty = {default})"))
        .allow_empty(true)
        .interact_text()?;
    let name = name.trim();
    Ok(if name.is_empty() {
        default.to_string()
    } else {
        name.to_string()
    })
}
