use crate::job::ArchiveJob;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Size reported by a dry run, where no artifact exists to measure.
pub const ESTIMATED_SIZE: &str = "(estimasi)";

/// JSON record describing the artifacts of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub output: PathBuf,
    pub archive: PathBuf,
    pub size: String,
    pub files: Vec<PathBuf>,
}

impl RunSummary {
    pub fn new(job: &ArchiveJob, size: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            output: job.output_dir.clone(),
            archive: job.primary_output.clone(),
            size: size.into(),
            files: job.files_to_upload.clone(),
        }
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// File name of the summary of run `base_name`.
pub fn file_name(base_name: &str) -> String {
    format!("{base_name}.summary.json")
}
