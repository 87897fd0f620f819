//! Pre-flight credential resolution.
//!
//! The archive password is settled before the pipeline starts so that no
//! stage ever blocks on interactive input. Precedence: an explicit password
//! from the configuration, then an interactive prompt (interactive runs only),
//! then nothing.

use crate::config::EffectiveConfig;
use crate::error::PipelineError;
use crate::job::ArchiveFormat;
use std::fmt;
use std::io;
use tracing::info;

/// An archive password. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Source of interactively entered passwords.
pub trait PasswordPrompt {
    fn prompt(&self, label: &str) -> io::Result<String>;
}

/// Reads a password from the terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&self, label: &str) -> io::Result<String> {
        dialoguer::Password::new()
            .with_prompt(label)
            .interact()
            .map_err(io::Error::other)
    }
}

/// Describes the encryption that needs a password, or `None` when the run
/// does not encrypt anything.
pub fn encryption_purpose(config: &EffectiveConfig) -> Option<&'static str> {
    match config.format {
        ArchiveFormat::Tar | ArchiveFormat::Tgz if config.use_gpg => Some("GPG encryption"),
        ArchiveFormat::Zip if config.zip_encrypt && config.zip_aes => Some("ZIP AES-256"),
        ArchiveFormat::Zip if config.zip_encrypt => Some("ZIP encryption"),
        ArchiveFormat::SevenZ if config.zip_encrypt => Some("7z encryption"),
        _ => None,
    }
}

/// Resolves the password for this run.
///
/// `prompt` is `None` for headless runs. A headless run that needs a password
/// and has none configured fails here, before anything is written. Dry runs
/// never prompt.
pub fn resolve_password(
    config: &EffectiveConfig,
    prompt: Option<&dyn PasswordPrompt>,
) -> Result<Option<Password>, PipelineError> {
    if let Some(password) = &config.password {
        return Ok(Some(password.clone()));
    }
    let Some(purpose) = encryption_purpose(config) else {
        return Ok(None);
    };
    if config.dry_run {
        info!("DRY-RUN: password prompt for {purpose} skipped");
        return Ok(None);
    }
    let Some(prompt) = prompt else {
        return Err(PipelineError::PasswordRequired(purpose));
    };
    let secret = prompt.prompt(&format!("Password for {purpose}"))?;
    if secret.is_empty() {
        return Err(PipelineError::PasswordRequired(purpose));
    }
    Ok(Some(Password::new(secret)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FixedPrompt {
        answer: &'static str,
        asked: Cell<u32>,
    }

    impl PasswordPrompt for FixedPrompt {
        fn prompt(&self, _label: &str) -> io::Result<String> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.answer.to_string())
        }
    }

    fn prompt(answer: &'static str) -> FixedPrompt {
        FixedPrompt {
            answer,
            asked: Cell::new(0),
        }
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        assert_eq!(format!("{password:?}"), "Password(***)");
        assert_eq!(password.expose(), "hunter2");
    }

    #[test]
    fn test_explicit_password_wins_over_prompt() {
        let config = EffectiveConfig {
            zip_encrypt: true,
            password: Some(Password::new("explicit")),
            ..EffectiveConfig::default()
        };
        let fixed = prompt("typed");
        let resolved = resolve_password(&config, Some(&fixed)).unwrap();
        assert_eq!(resolved, Some(Password::new("explicit")));
        assert_eq!(fixed.asked.get(), 0);
    }

    #[test]
    fn test_prompt_used_when_encryption_requested() {
        let config = EffectiveConfig {
            zip_encrypt: true,
            ..EffectiveConfig::default()
        };
        let fixed = prompt("typed");
        let resolved = resolve_password(&config, Some(&fixed)).unwrap();
        assert_eq!(resolved, Some(Password::new("typed")));
        assert_eq!(fixed.asked.get(), 1);
    }

    #[test]
    fn test_no_encryption_needs_no_password() {
        let config = EffectiveConfig::default();
        let fixed = prompt("typed");
        assert_eq!(resolve_password(&config, Some(&fixed)).unwrap(), None);
        assert_eq!(fixed.asked.get(), 0);
    }

    #[test]
    fn test_headless_without_password_fails() {
        let config = EffectiveConfig {
            format: ArchiveFormat::Tgz,
            use_gpg: true,
            headless: true,
            ..EffectiveConfig::default()
        };
        let err = resolve_password(&config, None).unwrap_err();
        assert!(matches!(err, PipelineError::PasswordRequired("GPG encryption")));
    }

    #[test]
    fn test_dry_run_never_prompts() {
        let config = EffectiveConfig {
            zip_encrypt: true,
            dry_run: true,
            ..EffectiveConfig::default()
        };
        let fixed = prompt("typed");
        assert_eq!(resolve_password(&config, Some(&fixed)).unwrap(), None);
        assert_eq!(fixed.asked.get(), 0);
    }

    #[test]
    fn test_gpg_ignored_for_zip() {
        let config = EffectiveConfig {
            use_gpg: true,
            ..EffectiveConfig::default()
        };
        assert_eq!(encryption_purpose(&config), None);
    }
}
