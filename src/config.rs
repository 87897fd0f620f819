//! Effective configuration of a run.
//!
//! Settings come from three sources, lowest precedence first: built-in
//! defaults, an optional `KEY=VALUE` configuration file and explicit command
//! line flags. They are merged once into an immutable [`EffectiveConfig`]
//! that every stage borrows.

use crate::credentials::Password;
use crate::job::{ArchiveFormat, SplitRetention, UploadTool};
use crate::path_util::expand_path;
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::{env, fs, io};
use thiserror::Error;
use tracing::{debug, warn};

/// Upload attempts per file when nothing else is configured.
pub const DEFAULT_UPLOAD_RETRY: u32 = 3;
/// Directory searched for notification plugins when nothing else is configured.
pub const DEFAULT_PLUGINS_DIR: &str = "./plugins.d";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file '{}' cannot be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported upload tool: {0}")]
    UnsupportedUploadTool(String),
}

/// Telegram notifier settings. Missing values fall back to the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// Email notifier settings. Missing values fall back to the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailSettings {
    pub to: Option<String>,
    pub subject: Option<String>,
}

/// Fully merged settings for one run. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    /// Directory the interactive picker starts in.
    pub start_dir: PathBuf,
    /// Default output directory.
    pub dest_dir: PathBuf,
    pub format: ArchiveFormat,
    /// Produce ZIP archives with AES-256 through 7z instead of ZipCrypto.
    pub zip_aes: bool,
    /// Encrypt zip/7z archives, prompting for a password when none is configured.
    pub zip_encrypt: bool,
    /// Encrypt tar/tgz archives with GPG.
    pub use_gpg: bool,
    pub password: Option<Password>,
    /// Raw split threshold such as `200m`, parsed by the split stage.
    pub split_size: Option<String>,
    pub split_retention: SplitRetention,
    /// Archive base name; a timestamped name is used when absent.
    pub out_name: Option<String>,
    /// Inline exclude patterns, in the order given.
    pub excludes: Vec<String>,
    pub exclude_file: Option<PathBuf>,
    /// Run without the interactive picker.
    pub headless: bool,
    pub sources: Vec<String>,
    pub upload_target: Option<String>,
    pub upload_tool: UploadTool,
    pub upload_retry: u32,
    pub after_upload_rm: bool,
    pub dry_run: bool,
    pub plugins_dir: PathBuf,
    pub notify_targets: Vec<String>,
    /// Free-form string passed to plugins as `NOTIFY_CONFIG`.
    pub notify_config: String,
    pub make_summary: bool,
    pub make_checksum: bool,
    pub summary_dir: Option<PathBuf>,
    pub checksum_dir: Option<PathBuf>,
    pub telegram: TelegramSettings,
    pub email: EmailSettings,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            start_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            dest_dir: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            format: ArchiveFormat::Zip,
            zip_aes: false,
            zip_encrypt: false,
            use_gpg: false,
            password: None,
            split_size: None,
            split_retention: SplitRetention::KeepBoth,
            out_name: None,
            excludes: vec![],
            exclude_file: None,
            headless: false,
            sources: vec![],
            upload_target: None,
            upload_tool: UploadTool::Auto,
            upload_retry: DEFAULT_UPLOAD_RETRY,
            after_upload_rm: false,
            dry_run: false,
            plugins_dir: PathBuf::from(DEFAULT_PLUGINS_DIR),
            notify_targets: vec![],
            notify_config: String::new(),
            make_summary: false,
            make_checksum: false,
            summary_dir: None,
            checksum_dir: None,
            telegram: TelegramSettings::default(),
            email: EmailSettings::default(),
        }
    }
}

/// Settings supplied by one source (config file or command line).
///
/// `None` means "not set by this source". List fields accumulate across sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub start_dir: Option<PathBuf>,
    pub dest_dir: Option<PathBuf>,
    pub format: Option<ArchiveFormat>,
    pub zip_aes: Option<bool>,
    pub zip_encrypt: Option<bool>,
    pub use_gpg: Option<bool>,
    pub password: Option<String>,
    pub split_size: Option<String>,
    pub keep_after_split: Option<bool>,
    pub rm_after_split: Option<bool>,
    pub out_name: Option<String>,
    pub excludes: Vec<String>,
    pub exclude_file: Option<PathBuf>,
    pub headless: Option<bool>,
    pub sources: Vec<String>,
    pub upload_target: Option<String>,
    pub upload_tool: Option<UploadTool>,
    pub upload_retry: Option<u32>,
    pub after_upload_rm: Option<bool>,
    pub dry_run: Option<bool>,
    pub plugins_dir: Option<PathBuf>,
    pub notify_targets: Vec<String>,
    pub notify_config: Option<String>,
    pub make_summary: Option<bool>,
    pub make_checksum: Option<bool>,
    pub summary_dir: Option<PathBuf>,
    pub checksum_dir: Option<PathBuf>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub email_to: Option<String>,
    pub email_subject: Option<String>,
}

/// Merges `defaults`, the optional config file and the command line into one configuration.
///
/// An unreadable config file is logged and skipped. Unknown archive formats or
/// upload tools in the file are fatal.
pub fn resolve(
    defaults: EffectiveConfig,
    config_file: Option<&Path>,
    cli: Overrides,
) -> Result<EffectiveConfig, ConfigError> {
    let file = match config_file {
        Some(path) => match load_config_file(path) {
            Ok(overrides) => overrides,
            Err(e @ ConfigError::Unreadable { .. }) => {
                warn!("{e}");
                Overrides::default()
            }
            Err(e) => return Err(e),
        },
        None => Overrides::default(),
    };

    let mut config = defaults;
    let mut keep = None;
    let mut remove = None;
    for layer in [file, cli] {
        keep = layer.keep_after_split.or(keep);
        remove = layer.rm_after_split.or(remove);
        layer.apply(&mut config);
    }
    config.split_retention = split_retention(keep, remove, config.split_retention);
    Ok(config)
}

/// Keep-after-split and remove-after-split are mutually exclusive; keep wins.
fn split_retention(
    keep: Option<bool>,
    remove: Option<bool>,
    default: SplitRetention,
) -> SplitRetention {
    match (keep, remove) {
        (Some(true), Some(true)) => {
            debug!("both keep-after-split and rm-after-split are set; keeping the unsplit archive");
            SplitRetention::KeepBoth
        }
        (Some(true), _) => SplitRetention::KeepBoth,
        (_, Some(true)) => SplitRetention::RemoveOriginal,
        _ => default,
    }
}

impl Overrides {
    fn apply(self, config: &mut EffectiveConfig) {
        set(&mut config.start_dir, self.start_dir);
        set(&mut config.dest_dir, self.dest_dir);
        set(&mut config.format, self.format);
        set(&mut config.zip_aes, self.zip_aes);
        set(&mut config.zip_encrypt, self.zip_encrypt);
        set(&mut config.use_gpg, self.use_gpg);
        if let Some(password) = self.password {
            config.password = Some(Password::new(password));
        }
        set_some(&mut config.split_size, self.split_size);
        set_some(&mut config.out_name, self.out_name);
        config.excludes.extend(self.excludes);
        set_some(&mut config.exclude_file, self.exclude_file);
        set(&mut config.headless, self.headless);
        config.sources.extend(self.sources);
        set_some(&mut config.upload_target, self.upload_target);
        set(&mut config.upload_tool, self.upload_tool);
        set(&mut config.upload_retry, self.upload_retry);
        set(&mut config.after_upload_rm, self.after_upload_rm);
        set(&mut config.dry_run, self.dry_run);
        set(&mut config.plugins_dir, self.plugins_dir);
        config.notify_targets.extend(self.notify_targets);
        set(&mut config.notify_config, self.notify_config);
        set(&mut config.make_summary, self.make_summary);
        set(&mut config.make_checksum, self.make_checksum);
        set_some(&mut config.summary_dir, self.summary_dir);
        set_some(&mut config.checksum_dir, self.checksum_dir);
        set_some(&mut config.telegram.bot_token, self.telegram_bot_token);
        set_some(&mut config.telegram.chat_id, self.telegram_chat_id);
        set_some(&mut config.email.to, self.email_to);
        set_some(&mut config.email.subject, self.email_subject);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Reads and parses a `KEY=VALUE` configuration file.
pub fn load_config_file(path: &Path) -> Result<Overrides, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

/// Parses configuration file content.
///
/// Blank lines, `#` comments, lines without `=` and unknown keys are ignored.
/// Values may be wrapped in single or double quotes.
pub fn parse_config(text: &str) -> Result<Overrides, ConfigError> {
    let mut o = Overrides::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "ZIP_AES" => o.zip_aes = Some(parse_bool(value)),
            "USE_GPG" => o.use_gpg = Some(parse_bool(value)),
            "ZIP_ENCRYPT" => o.zip_encrypt = Some(parse_bool(value)),
            "KEEP_AFTER_SPLIT" => o.keep_after_split = Some(parse_bool(value)),
            "RM_AFTER_SPLIT" => o.rm_after_split = Some(parse_bool(value)),
            "NO_UI" => o.headless = Some(parse_bool(value)),
            "AFTER_UPLOAD_RM" => o.after_upload_rm = Some(parse_bool(value)),
            "DRY_RUN" => o.dry_run = Some(parse_bool(value)),
            "MAKE_CHECKSUM" => o.make_checksum = Some(parse_bool(value)),
            "MAKE_SUMMARY" => o.make_summary = Some(parse_bool(value)),
            "START_DIR" => o.start_dir = non_empty(value).map(expand_path),
            "DEST_DIR" => o.dest_dir = non_empty(value).map(expand_path),
            "ARCHIVE_FORMAT" => {
                if let Some(value) = non_empty(value) {
                    o.format = Some(parse_format(value)?);
                }
            }
            "SPLIT_SIZE" => o.split_size = non_empty(value).map(String::from),
            "OUT_NAME" => o.out_name = non_empty(value).map(String::from),
            "ZIP_PASSWORD" => o.password = non_empty(value).map(String::from),
            "EXCLUDE_FILE" => o.exclude_file = non_empty(value).map(expand_path),
            "UPLOAD_TARGET" => o.upload_target = non_empty(value).map(String::from),
            "UPLOAD_TOOL" => {
                if let Some(value) = non_empty(value) {
                    o.upload_tool = Some(parse_upload_tool(value)?);
                }
            }
            "UPLOAD_RETRY" => o.upload_retry = parse_retry(value),
            "PLUGINS_DIR" => o.plugins_dir = non_empty(value).map(expand_path),
            "NOTIFY_CONFIG" => o.notify_config = Some(value.to_string()),
            "EMAIL_TO" => o.email_to = non_empty(value).map(String::from),
            "EMAIL_SUBJECT" => o.email_subject = non_empty(value).map(String::from),
            "TELEGRAM_BOT_TOKEN" => o.telegram_bot_token = non_empty(value).map(String::from),
            "TELEGRAM_CHAT_ID" => o.telegram_chat_id = non_empty(value).map(String::from),
            "SUMMARY_DIR" => o.summary_dir = non_empty(value).map(expand_path),
            "CHECKSUM_DIR" => o.checksum_dir = non_empty(value).map(expand_path),
            "EXCLUDES" => o.excludes.extend(split_list(value)),
            "SOURCES" => o.sources.extend(split_list(value)),
            "NOTIFY" => o.notify_targets.extend(split_list(value)),
            _ => debug!("ignoring unknown config key {key}"),
        }
    }
    Ok(o)
}

/// Parses a boolean token.
///
/// `1/true/yes/on/y/t` are true, `0/false/no/off/n/f` and the empty string are
/// false, any other integer is true when nonzero. Everything else is false.
pub fn parse_bool(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => true,
        "0" | "false" | "no" | "off" | "n" | "f" | "" => false,
        other => other.parse::<i64>().map(|n| n != 0).unwrap_or(false),
    }
}

/// Splits a comma separated list, trimming items and dropping empty ones.
pub fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
}

/// Parses an archive format name; `tar.gz` is accepted for `tgz`.
pub fn parse_format(value: &str) -> Result<ArchiveFormat, ConfigError> {
    ArchiveFormat::from_str(value.trim(), true)
        .map_err(|_| ConfigError::UnsupportedFormat(value.to_string()))
}

pub fn parse_upload_tool(value: &str) -> Result<UploadTool, ConfigError> {
    UploadTool::from_str(value.trim(), true)
        .map_err(|_| ConfigError::UnsupportedUploadTool(value.to_string()))
}

fn parse_retry(value: &str) -> Option<u32> {
    let value = non_empty(value)?;
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Invalid UPLOAD_RETRY '{value}', using {DEFAULT_UPLOAD_RETRY}");
            None
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
