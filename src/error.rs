//! Fatal error taxonomy of a backup run.

use crate::config::ConfigError;
use crate::sysexits;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Conditions that abort a run. Recoverable problems are logged where they
/// happen and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No items selected.")]
    NoSelection,

    #[error("'{tool}' is required {purpose}")]
    MissingTool {
        tool: &'static str,
        purpose: &'static str,
    },

    #[error("{tool} exited with code {code} while {action}")]
    ToolFailed {
        tool: String,
        action: &'static str,
        code: i32,
    },

    #[error("Cannot create output directory '{}': {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A password is required for {0}, but none was configured and prompting is disabled")]
    PasswordRequired(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Interrupted {
            PipelineError::Interrupted
        } else {
            PipelineError::Io(err)
        }
    }
}

impl PipelineError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::NoSelection => sysexits::EX_NOINPUT,
            PipelineError::MissingTool { .. } => sysexits::EX_UNAVAILABLE,
            PipelineError::ToolFailed { .. } => sysexits::EX_SOFTWARE,
            PipelineError::OutputDir { .. } => sysexits::EX_CANTCREAT,
            PipelineError::PasswordRequired(_) | PipelineError::Config(_) => sysexits::EX_CONFIG,
            PipelineError::Interrupted => sysexits::EX_INTERRUPTED,
            PipelineError::Io(_) => sysexits::EX_IOERR,
        }
    }
}
