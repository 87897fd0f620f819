//! Archive builder: prepare, archive, encrypt, split, checksum, summarize.
//!
//! The stages run strictly in that order. A failure in a mandatory stage
//! aborts the run; the optional stages log their problems and carry on.

use crate::config::EffectiveConfig;
use crate::credentials::Password;
use crate::error::PipelineError;
use crate::exclude::{self, Syntax};
use crate::exec::{CommandSpec, Executor};
use crate::file_util::{
    disk_usage, human_size, parse_split_size, part_path, split_file, total_size, verify_gzip,
    verify_tar, verify_zip, write_checksum,
};
use crate::job::{ArchiveFormat, ArchiveJob, SplitRetention};
use crate::logging::RunLog;
use crate::summary::{self, ESTIMATED_SIZE, RunSummary};
use chrono::Local;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// In-process check run on a freshly created archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTest {
    Zip { encrypted: bool },
    Gzip,
    Tar,
}

/// How one archive gets created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    pub tool: &'static str,
    pub command: CommandSpec,
    pub self_test: Option<SelfTest>,
}

/// Builds the archiver invocation for `format`.
///
/// `has_tool` decides which helpers are installed. A missing archiver is an
/// error; a missing `pigz` falls back to gzip built into `tar`.
pub fn plan_archive(
    config: &EffectiveConfig,
    output: &Path,
    paths: &[PathBuf],
    patterns: &[String],
    password: Option<&Password>,
    has_tool: impl Fn(&str) -> bool,
) -> Result<ArchivePlan, PipelineError> {
    let require = |tool: &'static str, purpose: &'static str| {
        if has_tool(tool) {
            Ok(tool)
        } else {
            Err(PipelineError::MissingTool { tool, purpose })
        }
    };

    let plan = match config.format {
        ArchiveFormat::Zip if config.zip_aes => {
            let tool = require("7z", "for ZIP AES-256")?;
            let mut command = CommandSpec::new(tool).args(["a", "-tzip", "-mem=AES256"]).arg(output);
            if let Some(password) = password {
                command = command.secret_arg(format!("-p{}", password.expose()));
            }
            ArchivePlan {
                tool,
                command: command
                    .args(Syntax::SevenZip.to_args(patterns))
                    .args(paths),
                self_test: Some(SelfTest::Zip {
                    encrypted: password.is_some(),
                }),
            }
        }
        ArchiveFormat::Zip => {
            let tool = require("zip", "to create ZIP archives")?;
            let mut command = CommandSpec::new(tool).arg("-r");
            if let Some(password) = password {
                command = command.arg("-P").secret_arg(password.expose());
            }
            ArchivePlan {
                tool,
                command: command
                    .arg(output)
                    .args(paths)
                    .args(Syntax::Zip.to_args(patterns)),
                self_test: Some(SelfTest::Zip {
                    encrypted: password.is_some(),
                }),
            }
        }
        ArchiveFormat::Tar => {
            let tool = require("tar", "to create TAR archives")?;
            ArchivePlan {
                tool,
                command: CommandSpec::new(tool)
                    .args(Syntax::Tar.to_args(patterns))
                    .arg("-cf")
                    .arg(output)
                    .arg("--")
                    .args(paths),
                self_test: Some(SelfTest::Tar),
            }
        }
        ArchiveFormat::Tgz => {
            let tool = require("tar", "to create TGZ archives")?;
            let compressor = if has_tool("pigz") {
                "--use-compress-program=pigz"
            } else {
                "-z"
            };
            ArchivePlan {
                tool,
                command: CommandSpec::new(tool)
                    .args(Syntax::Tar.to_args(patterns))
                    .arg(compressor)
                    .arg("-cf")
                    .arg(output)
                    .arg("--")
                    .args(paths),
                self_test: Some(SelfTest::Gzip),
            }
        }
        ArchiveFormat::SevenZ => {
            let tool = require("7z", "to create 7z archives")?;
            let mut command = CommandSpec::new(tool).args(["a", "-t7z"]).arg(output);
            if let Some(password) = password {
                command = command
                    .secret_arg(format!("-p{}", password.expose()))
                    .arg("-mhe=on");
            }
            ArchivePlan {
                tool,
                command: command
                    .args(Syntax::SevenZip.to_args(patterns))
                    .args(paths),
                self_test: None,
            }
        }
    };
    Ok(plan)
}

/// GPG symmetric encryption of `input` into `<input>.gpg`; the passphrase goes to stdin.
pub fn gpg_command(input: &Path, password: Option<&Password>) -> CommandSpec {
    let mut output = OsString::from(input.as_os_str());
    output.push(".gpg");
    let command = CommandSpec::new("gpg")
        .args([
            "--batch",
            "--yes",
            "--pinentry-mode",
            "loopback",
            "--passphrase-fd",
            "0",
            "--symmetric",
            "--cipher-algo",
            "AES256",
            "--output",
        ])
        .arg(&output)
        .arg(input);
    match password {
        Some(password) => command.stdin(format!("{}\n", password.expose())),
        None => command,
    }
}

/// Runs the archive stages for one job.
#[derive(Debug)]
pub struct ArchiveBuilder<'a> {
    config: &'a EffectiveConfig,
    exec: Executor<'a>,
    password: Option<&'a Password>,
    run_log: &'a RunLog,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(
        config: &'a EffectiveConfig,
        exec: Executor<'a>,
        password: Option<&'a Password>,
        run_log: &'a RunLog,
    ) -> Self {
        Self {
            config,
            exec,
            password,
            run_log,
        }
    }

    /// Produces the archive for `paths` and fills in the artifacts of `job`.
    pub fn build(&self, paths: &[PathBuf], mut job: ArchiveJob) -> Result<ArchiveJob, PipelineError> {
        if paths.is_empty() {
            return Err(PipelineError::NoSelection);
        }
        let patterns = self.prepare(&job, paths)?;
        let archive = self.create_archive(&job, paths, &patterns)?;
        job.primary_output = self.encrypt(archive)?;
        job.files_to_upload = self.split(&job.primary_output)?;
        self.checksum(&job);
        job.summary_path = self.summarize(&job);
        Ok(job)
    }

    fn prepare(&self, job: &ArchiveJob, paths: &[PathBuf]) -> Result<Vec<String>, PipelineError> {
        if !self.exec.is_dry_run() {
            fs::create_dir_all(&job.output_dir).map_err(|source| PipelineError::OutputDir {
                path: job.output_dir.clone(),
                source,
            })?;
            match self.run_log.attach(&job.log_path) {
                Ok(()) => info!("Log: {}", job.log_path.display()),
                Err(e) => warn!("Cannot open log file '{}': {e}", job.log_path.display()),
            }
        }

        let patterns = exclude::resolve(&self.config.excludes, self.config.exclude_file.as_deref());
        if self.exec.is_dry_run() {
            self.report(job, paths, &patterns);
        }
        Ok(patterns)
    }

    fn report(&self, job: &ArchiveJob, paths: &[PathBuf], patterns: &[String]) {
        let config = self.config;
        info!("DRY-RUN mode: nothing will be changed");
        info!(
            "Format: {}  ZIP AES: {}  GPG: {}",
            config.format, config.zip_aes, config.use_gpg
        );
        info!(
            "Output dir: {}  Base: {}",
            job.output_dir.display(),
            job.base_name
        );
        info!(
            "Split: {}  Upload: {} ({})",
            config.split_size.as_deref().unwrap_or("-"),
            config.upload_target.as_deref().unwrap_or("-"),
            config.upload_tool
        );
        info!("Excludes: {}", exclude::preview(patterns));
        for path in paths {
            let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
            let size = if path.exists() {
                human_size(disk_usage(path))
            } else {
                "?".to_string()
            };
            info!("  - {name}  [{size}]");
        }
    }

    fn create_archive(
        &self,
        job: &ArchiveJob,
        paths: &[PathBuf],
        patterns: &[String],
    ) -> Result<PathBuf, PipelineError> {
        let output = job.archive_path(self.config.format);
        let plan = plan_archive(self.config, &output, paths, patterns, self.password, |tool| {
            self.exec.has_tool(tool)
        })?;

        let code = self.exec.run(&plan.command)?;
        if code != 0 {
            return Err(PipelineError::ToolFailed {
                tool: plan.tool.to_string(),
                action: "creating the archive",
                code,
            });
        }
        if !self.exec.is_dry_run()
            && let Some(test) = plan.self_test
        {
            self_test(&output, test);
        }
        Ok(output)
    }

    fn encrypt(&self, archive: PathBuf) -> Result<PathBuf, PipelineError> {
        if !self.config.use_gpg {
            return Ok(archive);
        }
        if !self.config.format.is_tar() {
            warn!(
                "GPG encryption applies to tar and tgz archives only, not {}",
                self.config.format
            );
            return Ok(archive);
        }
        if !self.exec.has_tool("gpg") {
            return Err(PipelineError::MissingTool {
                tool: "gpg",
                purpose: "for --gpg-encrypt",
            });
        }
        if self.password.is_none() && !self.exec.is_dry_run() {
            return Err(PipelineError::PasswordRequired("GPG encryption"));
        }

        let command = gpg_command(&archive, self.password);
        let code = self.exec.run(&command)?;
        if code != 0 {
            return Err(PipelineError::ToolFailed {
                tool: "gpg".into(),
                action: "encrypting the archive",
                code,
            });
        }
        let mut encrypted = archive.into_os_string();
        encrypted.push(".gpg");
        Ok(PathBuf::from(encrypted))
    }

    fn split(&self, primary: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let Some(raw) = self.config.split_size.as_deref() else {
            info!("Archive ready: {}", primary.display());
            return Ok(vec![primary.to_path_buf()]);
        };
        let Some(chunk) = parse_split_size(raw) else {
            warn!("Invalid split size '{raw}', not splitting");
            return Ok(vec![primary.to_path_buf()]);
        };
        if self.exec.is_dry_run() {
            info!(
                "DRY-RUN: split {} into {raw} chunks {}",
                primary.display(),
                part_path(primary, 0).display()
            );
            return Ok(vec![primary.to_path_buf()]);
        }

        info!("Splitting into {raw} chunks...");
        let mut files = split_file(primary, chunk)?;
        info!("Wrote {} chunks starting at {}", files.len(), part_path(primary, 0).display());
        match self.config.split_retention {
            SplitRetention::KeepBoth => files.push(primary.to_path_buf()),
            SplitRetention::RemoveOriginal => match fs::remove_file(primary) {
                Ok(()) => info!("Removed unsplit archive {}", primary.display()),
                Err(e) => warn!("Cannot remove unsplit archive '{}': {e}", primary.display()),
            },
        }
        Ok(files)
    }

    fn checksum(&self, job: &ArchiveJob) {
        if !self.config.make_checksum {
            return;
        }
        let dir = self.config.checksum_dir.as_deref().unwrap_or(&job.output_dir);
        if self.exec.is_dry_run() {
            for file in &job.files_to_upload {
                let name = file.file_name().unwrap_or_default().to_string_lossy();
                info!(
                    "DRY-RUN: sha256 {} > {}",
                    file.display(),
                    dir.join(format!("{name}.sha256")).display()
                );
            }
            return;
        }
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Skipping checksums, cannot create '{}': {e}", dir.display());
            return;
        }
        for file in &job.files_to_upload {
            match write_checksum(file, dir) {
                Ok(sidecar) => info!("SHA256: {}", sidecar.display()),
                Err(e) => warn!("Skipping checksum of '{}': {e}", file.display()),
            }
        }
    }

    fn summarize(&self, job: &ArchiveJob) -> Option<PathBuf> {
        if !self.config.make_summary {
            return None;
        }
        let dir = self.config.summary_dir.as_deref().unwrap_or(&job.output_dir);
        let path = dir.join(summary::file_name(&job.base_name));

        if self.exec.is_dry_run() {
            let record = RunSummary::new(job, ESTIMATED_SIZE, Local::now());
            info!("DRY-RUN: summary {} {}", path.display(), record.to_json());
            return Some(path);
        }

        let record = RunSummary::new(job, human_size(total_size(&job.files_to_upload)), Local::now());
        let written = fs::create_dir_all(dir).and_then(|()| record.write(&path));
        match written {
            Ok(()) => {
                info!("Summary: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Cannot write summary '{}': {e}", path.display());
                None
            }
        }
    }
}

fn self_test(archive: &Path, test: SelfTest) {
    let result = match test {
        SelfTest::Zip { encrypted } => verify_zip(archive, encrypted).map(|_| ()),
        SelfTest::Gzip => verify_gzip(archive).map(|_| ()),
        SelfTest::Tar => verify_tar(archive).map(|_| ()),
    };
    match result {
        Ok(()) => info!("Integrity check OK: {}", archive.display()),
        Err(e) => warn!("Integrity check failed for '{}': {e}", archive.display()),
    }
}
