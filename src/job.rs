use chrono::{DateTime, Local};
use clap::ValueEnum;
use std::fmt;
use std::path::PathBuf;

/// Supported archive formats. Each one is produced by exactly one external archiver.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    Tar,
    #[value(alias = "tar.gz")]
    Tgz,
    #[value(name = "7z")]
    SevenZ,
}

impl ArchiveFormat {
    /// File extension of the produced archive, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Tgz => "tar.gz",
            ArchiveFormat::SevenZ => "7z",
        }
    }

    /// Whether the archive is a tarball (and therefore eligible for GPG encryption).
    pub fn is_tar(&self) -> bool {
        matches!(self, ArchiveFormat::Tar | ArchiveFormat::Tgz)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Tgz => "tgz",
            ArchiveFormat::SevenZ => "7z",
        };
        f.write_str(name)
    }
}

/// Upload tool requested by the user. `Auto` is resolved at upload time.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UploadTool {
    #[default]
    Auto,
    Rclone,
    Aws,
    Lftp,
    Scp,
}

impl fmt::Display for UploadTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadTool::Auto => "auto",
            UploadTool::Rclone => "rclone",
            UploadTool::Aws => "aws",
            UploadTool::Lftp => "lftp",
            UploadTool::Scp => "scp",
        };
        f.write_str(name)
    }
}

/// What happens to the unsplit archive once its chunks are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SplitRetention {
    /// Upload the chunks and the unsplit archive.
    #[default]
    KeepBoth,
    /// Upload only the chunks and delete the unsplit archive.
    RemoveOriginal,
}

/// Aggregate status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalStatus {
    Success,
    Failure,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Success => "success",
            FinalStatus::Failure => "failure",
        }
    }

    /// Name of the notification event fired for this status.
    pub fn event_name(&self) -> &'static str {
        match self {
            FinalStatus::Success => "on_success",
            FinalStatus::Failure => "on_failure",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backup run: where it writes and what it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    /// Directory receiving the archive, chunks and log.
    pub output_dir: PathBuf,
    /// File name stem shared by every artifact of the run.
    pub base_name: String,
    /// Per-run log file.
    pub log_path: PathBuf,
    /// Archive that later stages operate on (the encrypted one when encryption ran).
    pub primary_output: PathBuf,
    /// Files handed to the upload stage, in order.
    pub files_to_upload: Vec<PathBuf>,
    /// Summary record, when one was produced.
    pub summary_path: Option<PathBuf>,
}

impl ArchiveJob {
    pub fn new(output_dir: PathBuf, base_name: impl Into<String>) -> Self {
        let base_name = base_name.into();
        let log_path = output_dir.join(format!("{base_name}.log"));
        Self {
            output_dir,
            base_name,
            log_path,
            primary_output: PathBuf::new(),
            files_to_upload: vec![],
            summary_path: None,
        }
    }

    /// Path of the archive produced for `format` before encryption.
    pub fn archive_path(&self, format: ArchiveFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.base_name, format.extension()))
    }
}

/// Default base name of a run started at `now`.
pub fn run_name(now: DateTime<Local>) -> String {
    now.format("backup-%Y%m%d-%H%M%S").to_string()
}
