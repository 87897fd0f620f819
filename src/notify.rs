//! Notification dispatcher: builtin telegram and email notifiers plus
//! external plugins that receive the run outcome as environment variables.

use crate::config::EffectiveConfig;
use crate::error::PipelineError;
use crate::exec::{CommandSpec, Executor};
use crate::file_util::{human_size, total_size};
use crate::job::{ArchiveJob, FinalStatus};
use crate::summary::ESTIMATED_SIZE;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PLUGIN_SUFFIXES: [&str; 3] = ["", ".py", ".sh"];

/// Outcome of a run as delivered to notifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub status: FinalStatus,
    pub summary_file: Option<PathBuf>,
    pub archive_path: PathBuf,
    pub files: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub base_name: String,
    pub log_file: PathBuf,
    pub notify_config: String,
    pub upload_target: Option<String>,
    pub dry_run: bool,
    pub total_size: String,
}

impl NotificationEvent {
    /// Builds the event for `job`. `total_size` is measured before the upload
    /// stage, which may delete local files.
    pub fn new(
        job: &ArchiveJob,
        status: FinalStatus,
        config: &EffectiveConfig,
        total_size: String,
    ) -> Self {
        Self {
            status,
            summary_file: job.summary_path.clone(),
            archive_path: job.primary_output.clone(),
            files: job.files_to_upload.clone(),
            output_dir: job.output_dir.clone(),
            base_name: job.base_name.clone(),
            log_file: job.log_path.clone(),
            notify_config: config.notify_config.clone(),
            upload_target: config.upload_target.clone(),
            dry_run: config.dry_run,
            total_size,
        }
    }

    pub fn event_name(&self) -> &'static str {
        self.status.event_name()
    }

    /// Environment handed to plugins, on top of the inherited one.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let files = self
            .files
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        vec![
            ("EVENT", self.event_name().to_string()),
            ("STATUS", self.status.to_string()),
            (
                "SUMMARY_FILE",
                self.summary_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("ARCHIVE_PATH", self.archive_path.display().to_string()),
            ("FILES", files),
            ("OUTPUT_DIR", self.output_dir.display().to_string()),
            ("BASE_NAME", self.base_name.clone()),
            ("LOG_FILE", self.log_file.display().to_string()),
            ("NOTIFY_CONFIG", self.notify_config.clone()),
            ("UPLOAD_TARGET", self.upload_target.clone().unwrap_or_default()),
            ("DRY_RUN", if self.dry_run { "1" } else { "0" }.to_string()),
            ("TOTAL_SIZE", self.total_size.clone()),
        ]
    }
}

/// Human readable total size of the upload candidates of `job`.
pub fn artifact_size(job: &ArchiveJob, dry_run: bool) -> String {
    if dry_run {
        ESTIMATED_SIZE.to_string()
    } else {
        human_size(total_size(&job.files_to_upload))
    }
}

/// What exists at a candidate plugin path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Missing,
    Executable,
    NotExecutable,
}

/// Probes the filesystem. Directories count as missing.
pub fn probe_path(path: &Path) -> Probe {
    let Ok(metadata) = fs::metadata(path) else {
        return Probe::Missing;
    };
    if !metadata.is_file() {
        return Probe::Missing;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 != 0 {
            Probe::Executable
        } else {
            Probe::NotExecutable
        }
    }
    #[cfg(not(unix))]
    {
        Probe::Executable
    }
}

/// How a resolved plugin is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    Direct,
    Interpreter(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlugin {
    pub path: PathBuf,
    pub invocation: Invocation,
}

impl ResolvedPlugin {
    pub fn command(&self) -> CommandSpec {
        match self.invocation {
            Invocation::Direct => CommandSpec::new(&self.path),
            Invocation::Interpreter(program) => CommandSpec::new(program).arg(&self.path),
        }
    }
}

/// Paths tried for plugin `name`: the literal path, then `plugins_dir/name`,
/// each bare and with `.py` and `.sh` appended.
pub fn plugin_candidates(name: &str, plugins_dir: &Path) -> Vec<PathBuf> {
    let bases = [PathBuf::from(name), plugins_dir.join(name)];
    bases
        .iter()
        .flat_map(|base| {
            PLUGIN_SUFFIXES.iter().map(move |suffix| {
                let mut path = base.clone().into_os_string();
                path.push(suffix);
                PathBuf::from(path)
            })
        })
        .collect()
}

/// Resolves plugin `name` against `plugins_dir` using `probe`.
///
/// The first executable candidate wins. A non-executable `.py` file runs
/// under `python3` and a non-executable `.sh` file under `sh`.
pub fn resolve_plugin(
    name: &str,
    plugins_dir: &Path,
    probe: impl Fn(&Path) -> Probe,
) -> Option<ResolvedPlugin> {
    plugin_candidates(name, plugins_dir)
        .into_iter()
        .find_map(|path| {
            let invocation = match probe(&path) {
                Probe::Missing => return None,
                Probe::Executable => Invocation::Direct,
                Probe::NotExecutable => match path.extension().and_then(|e| e.to_str()) {
                    Some("py") => Invocation::Interpreter("python3"),
                    Some("sh") => Invocation::Interpreter("sh"),
                    _ => return None,
                },
            };
            Some(ResolvedPlugin { path, invocation })
        })
}

/// Fires one event at every configured notify target, in order.
pub struct Notifier<'a> {
    config: &'a EffectiveConfig,
    exec: Executor<'a>,
}

impl<'a> Notifier<'a> {
    pub fn new(config: &'a EffectiveConfig, exec: Executor<'a>) -> Self {
        Self { config, exec }
    }

    /// Delivers `event`. Notifier problems are logged; only an interruption
    /// is returned as an error.
    pub fn notify(&self, event: &NotificationEvent) -> Result<(), PipelineError> {
        for target in &self.config.notify_targets {
            let target = target.trim();
            match target {
                "" => {}
                "telegram" => self.telegram(event)?,
                "email" => self.email(event)?,
                plugin => self.plugin(plugin, event)?,
            }
        }
        Ok(())
    }

    fn telegram(&self, event: &NotificationEvent) -> Result<(), PipelineError> {
        let telegram = &self.config.telegram;
        let token = setting(telegram.bot_token.as_deref(), "TELEGRAM_BOT_TOKEN");
        let chat_id = setting(telegram.chat_id.as_deref(), "TELEGRAM_CHAT_ID");
        let (Some(token), Some(chat_id)) = (token, chat_id) else {
            info!("Telegram settings incomplete, skipping");
            return Ok(());
        };
        if !self.exec.has_tool("curl") {
            info!("curl not found, skipping telegram");
            return Ok(());
        }

        let text = format!(
            "*{}*\nStatus: {}\nArchive: {}",
            event.base_name,
            event.status,
            event.archive_path.display()
        );
        let command = CommandSpec::new("curl")
            .args(["-s", "--max-time", "10", "-X", "POST"])
            .secret_arg(format!("https://api.telegram.org/bot{token}/sendMessage"))
            .arg("-d")
            .arg(format!("chat_id={chat_id}"))
            .arg("-d")
            .arg("parse_mode=Markdown")
            .arg("--data-urlencode")
            .arg(format!("text={text}"))
            .quiet();
        match self.exec.run(&command)? {
            0 => info!("Telegram notification sent"),
            code => warn!("Telegram notification failed (exit code {code})"),
        }
        Ok(())
    }

    fn email(&self, event: &NotificationEvent) -> Result<(), PipelineError> {
        let email = &self.config.email;
        let Some(to) = setting(email.to.as_deref(), "EMAIL_TO") else {
            info!("EMAIL_TO not set, skipping email");
            return Ok(());
        };
        let subject = setting(email.subject.as_deref(), "EMAIL_SUBJECT")
            .unwrap_or_else(|| format!("Backup {}: {}", event.base_name, event.status));
        let Some(program) = ["mail", "mailx"]
            .into_iter()
            .find(|p| self.exec.has_tool(p))
        else {
            info!("mail/mailx not found, skipping email");
            return Ok(());
        };

        let body = format!(
            "Status: {}\nArchive: {}\nTarget: {}",
            event.status,
            event.archive_path.display(),
            event.upload_target.as_deref().unwrap_or("")
        );
        let command = CommandSpec::new(program)
            .arg("-s")
            .arg(subject)
            .arg(to)
            .stdin(body);
        match self.exec.run(&command)? {
            0 => info!("Email notification sent"),
            code => warn!("{program} failed (exit code {code})"),
        }
        Ok(())
    }

    fn plugin(&self, name: &str, event: &NotificationEvent) -> Result<(), PipelineError> {
        let plugins_dir = &self.config.plugins_dir;
        let Some(plugin) = resolve_plugin(name, plugins_dir, probe_path) else {
            info!(
                "Plugin not found or not executable: {name} (searched {} with .py/.sh)",
                plugins_dir.display()
            );
            return Ok(());
        };
        debug!(
            "Running plugin {} for {}",
            plugin.path.display(),
            event.event_name()
        );
        let command = event
            .env()
            .into_iter()
            .fold(plugin.command(), |cmd, (key, value)| cmd.env(key, value));
        match self.exec.run(&command)? {
            0 => {}
            code => warn!("Plugin {name} exited with code {code}"),
        }
        Ok(())
    }
}

/// A configured value, falling back to the environment variable `key`.
fn setting(configured: Option<&str>, key: &str) -> Option<String> {
    configured
        .map(String::from)
        .or_else(|| env::var(key).ok())
        .filter(|v| !v.is_empty())
}
