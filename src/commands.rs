//! Command-line interface and run orchestration.
//!
//! A run resolves its configuration, settles the selection and the archive
//! password, then drives the archive, upload and notification stages in
//! order.

use crate::archive::ArchiveBuilder;
use crate::config::{self, EffectiveConfig, Overrides};
use crate::credentials::{self, Password, PasswordPrompt, TerminalPrompt};
use crate::error::PipelineError;
use crate::exec::{CommandRunner, Executor, SystemRunner};
use crate::job::{ArchiveFormat, ArchiveJob, FinalStatus, UploadTool, run_name};
use crate::logging::RunLog;
use crate::notify::{self, NotificationEvent, Notifier};
use crate::path_util::{absolutize, check_dir, expand_path};
use crate::selection::{self, SelectionSet};
use crate::upload::{InterruptibleSleeper, Sleeper, UploadDispatcher, UploadReport};
use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser};
use std::path::PathBuf;
use tracing::{error, info};

/// Archive files with external tools, then split, upload and notify.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub archive: ArchiveArgs,

    #[command(flatten)]
    pub split: SplitArgs,

    #[command(flatten)]
    pub upload: UploadArgs,

    #[command(flatten)]
    pub mode: ModeArgs,

    #[command(flatten)]
    pub notify: NotifyArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Log debug output.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Archive")]
pub struct ArchiveArgs {
    /// Archive format.
    #[arg(long)]
    pub format: Option<ArchiveFormat>,
    /// Archive base name (default: backup-YYYYMMDD-HHMMSS).
    #[arg(long)]
    pub name: Option<String>,
    /// Create ZIP archives with AES-256 (requires 7z).
    #[arg(long)]
    pub zip_aes: bool,
    /// Encrypt zip/7z archives, prompting for a password if none is given.
    #[arg(long)]
    pub zip_encrypt: bool,
    /// Password for zip/7z/GPG encryption.
    #[arg(long)]
    pub password: Option<String>,
    /// Encrypt tar/tgz archives with GPG.
    #[arg(long)]
    pub gpg_encrypt: bool,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Split & exclude")]
pub struct SplitArgs {
    /// Split the archive into chunks, e.g. 100m or 1g.
    #[arg(long)]
    pub split: Option<String>,
    /// Keep and upload the unsplit archive next to the chunks.
    #[arg(long)]
    pub keep_after_split: bool,
    /// Delete the unsplit archive after splitting.
    #[arg(long)]
    pub rm_after_split: bool,
    /// Exclude pattern (repeatable, comma separated).
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,
    /// File with one exclude pattern per line.
    #[arg(long)]
    pub exclude_from: Option<String>,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Upload")]
pub struct UploadArgs {
    /// Upload target, e.g. remote:path, s3://bucket/path or sftp://host:/path.
    #[arg(long)]
    pub upload: Option<String>,
    /// Upload tool.
    #[arg(long)]
    pub upload_tool: Option<UploadTool>,
    /// Delete local files after a successful upload.
    #[arg(long)]
    pub after_upload_rm: bool,
    /// Upload attempts per file (default: 3).
    #[arg(long)]
    pub upload_retry: Option<u32>,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Mode")]
pub struct ModeArgs {
    /// Directory the interactive picker starts in.
    #[arg(short, long)]
    pub start: Option<String>,
    /// Output directory.
    #[arg(long)]
    pub dest: Option<String>,
    /// Run without prompts, archiving the --source paths.
    #[arg(long)]
    pub no_ui: bool,
    /// Source path (repeatable).
    #[arg(long)]
    pub source: Vec<String>,
    /// KEY=VALUE configuration file.
    #[arg(long)]
    pub config: Option<String>,
    /// Log every action without changing anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Notify")]
pub struct NotifyArgs {
    /// Notify target: telegram, email or a plugin name (repeatable, comma separated).
    #[arg(long, value_delimiter = ',')]
    pub notify: Vec<String>,
    /// Free-form string passed to plugins as NOTIFY_CONFIG.
    #[arg(long)]
    pub notify_config: Option<String>,
    /// Directory searched for plugins (default: ./plugins.d).
    #[arg(long)]
    pub plugins_dir: Option<String>,
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Output")]
pub struct OutputArgs {
    /// Directory for the .summary.json file.
    #[arg(long)]
    pub summary_dir: Option<String>,
    /// Directory for .sha256 files.
    #[arg(long)]
    pub checksum_dir: Option<String>,
    /// Write a JSON summary of the run.
    #[arg(long, overrides_with = "no_summary")]
    pub summary: bool,
    /// Do not write a summary.
    #[arg(long, overrides_with = "summary")]
    pub no_summary: bool,
    /// Write a SHA-256 file next to every upload candidate.
    #[arg(long, overrides_with = "no_checksum")]
    pub checksum: bool,
    /// Do not write checksums.
    #[arg(long, overrides_with = "checksum")]
    pub no_checksum: bool,
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn path(raw: &Option<String>) -> Option<PathBuf> {
    raw.as_deref().map(expand_path)
}

impl Cli {
    /// Settings given explicitly on the command line.
    pub fn overrides(&self) -> Overrides {
        let Cli {
            archive,
            split,
            upload,
            mode,
            notify,
            output,
            verbose: _,
        } = self;
        Overrides {
            start_dir: path(&mode.start),
            dest_dir: path(&mode.dest),
            format: archive.format,
            zip_aes: flag(archive.zip_aes),
            zip_encrypt: flag(archive.zip_encrypt),
            use_gpg: flag(archive.gpg_encrypt),
            password: archive.password.clone(),
            split_size: split.split.clone(),
            keep_after_split: flag(split.keep_after_split),
            rm_after_split: flag(split.rm_after_split),
            out_name: archive.name.clone(),
            excludes: config::split_list(&split.exclude.join(",")).collect(),
            exclude_file: path(&split.exclude_from),
            headless: flag(mode.no_ui),
            sources: mode.source.clone(),
            upload_target: upload.upload.clone(),
            upload_tool: upload.upload_tool,
            upload_retry: upload.upload_retry,
            after_upload_rm: flag(upload.after_upload_rm),
            dry_run: flag(mode.dry_run),
            plugins_dir: path(&notify.plugins_dir),
            notify_targets: config::split_list(&notify.notify.join(",")).collect(),
            notify_config: notify.notify_config.clone(),
            make_summary: toggle(output.summary, output.no_summary),
            make_checksum: toggle(output.checksum, output.no_checksum),
            summary_dir: path(&output.summary_dir),
            checksum_dir: path(&output.checksum_dir),
            ..Overrides::default()
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job: ArchiveJob,
    pub uploads: UploadReport,
    pub event: NotificationEvent,
}

impl RunReport {
    pub fn status(&self) -> FinalStatus {
        self.uploads.status
    }
}

/// Runs the backup described by `cli`.
pub fn run(cli: &Cli, run_log: &RunLog) -> Result<FinalStatus> {
    let config_file = cli.mode.config.as_deref().map(expand_path);
    let config = config::resolve(
        EffectiveConfig::default(),
        config_file.as_deref(),
        cli.overrides(),
    )
    .map_err(PipelineError::from)?;
    check_dir(&config.start_dir)?;

    let default_name = config
        .out_name
        .clone()
        .unwrap_or_else(|| run_name(Local::now()));

    let (selection, output_dir, base_name) = if config.headless {
        let mut selection = SelectionSet::new();
        selection.apply_sources(&config.sources);
        (selection, config.dest_dir.clone(), default_name)
    } else {
        let mut selection = selection::pick_interactive(&config.start_dir)?;
        selection.apply_sources(&config.sources);
        if selection.is_empty() {
            return Err(PipelineError::NoSelection.into());
        }
        let output_dir = selection::choose_destination(&config)?;
        let base_name = selection::choose_base_name(&default_name)?;
        (selection, output_dir, base_name)
    };
    if selection.is_empty() {
        return Err(PipelineError::NoSelection.into());
    }

    let terminal = TerminalPrompt;
    let prompt: Option<&dyn PasswordPrompt> = if config.headless {
        None
    } else {
        Some(&terminal)
    };
    let password = credentials::resolve_password(&config, prompt)?;

    let sleeper = InterruptibleSleeper::new().context("Failed to start the timer runtime")?;
    let job = ArchiveJob::new(absolutize(&output_dir), base_name);
    let report = run_backup(
        &config,
        selection.paths(),
        job,
        password.as_ref(),
        &SystemRunner,
        &sleeper,
        run_log,
    )?;
    Ok(report.status())
}

/// Archives `paths`, uploads the artifacts and fires the final notification.
pub fn run_backup(
    config: &EffectiveConfig,
    paths: &[PathBuf],
    job: ArchiveJob,
    password: Option<&Password>,
    runner: &dyn CommandRunner,
    sleeper: &dyn Sleeper,
    run_log: &RunLog,
) -> Result<RunReport, PipelineError> {
    let exec = Executor::new(runner, config.dry_run);
    info!(
        "Backing up {} item(s) to {} as {}",
        paths.len(),
        job.output_dir.display(),
        job.base_name
    );

    let job = ArchiveBuilder::new(config, exec, password, run_log).build(paths, job)?;
    let total_size = notify::artifact_size(&job, config.dry_run);

    let uploads = UploadDispatcher::new(exec, sleeper, config.after_upload_rm).upload_all(
        &job.files_to_upload,
        config.upload_target.as_deref(),
        config.upload_tool,
        config.upload_retry,
    )?;

    let event = NotificationEvent::new(&job, uploads.status, config, total_size);
    Notifier::new(config, exec).notify(&event)?;

    match uploads.status {
        FinalStatus::Success => info!("Backup finished: {}", job.primary_output.display()),
        FinalStatus::Failure => error!("Backup finished with upload failures"),
    }
    Ok(RunReport {
        job,
        uploads,
        event,
    })
}
