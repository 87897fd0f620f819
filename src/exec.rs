//! External command execution.
//!
//! Every archiver, encryptor, uploader and notifier is described as a
//! [`CommandSpec`] and run through a [`CommandRunner`]. The [`Executor`]
//! wraps a runner and short-circuits every invocation in dry-run mode.

use crate::error::PipelineError;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Exit code reported when a program could not be started at all.
pub const SPAWN_FAILED: i32 = 127;

const REDACTED: &str = "******";

/// A program invocation: arguments, extra environment and optional stdin.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    secret_args: Vec<usize>,
    envs: Vec<(OsString, OsString)>,
    stdin: Option<String>,
    quiet: bool,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Adds an argument that is masked whenever the command is displayed.
    pub fn secret_arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Text written to the child's stdin, which is then closed. Never displayed.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Discards the child's stdout and stderr.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Program name as a lossy string, for error messages.
    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(&self.program)
            .to_string_lossy()
            .into_owned()
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(OsString, OsString)] {
        &self.envs
    }

    pub fn get_stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Arguments as lossy strings, for assertions and logs. Secrets included.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.program.to_string_lossy()))?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                write!(f, " {REDACTED}")?;
            } else {
                write!(f, " {}", quote(&arg.to_string_lossy()))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandSpec({self})")
    }
}

fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Runs commands and detects installed tools.
pub trait CommandRunner {
    /// Runs `cmd` to completion and returns its exit code.
    ///
    /// A child terminated by SIGINT is reported as an
    /// [`io::ErrorKind::Interrupted`] error.
    fn run(&self, cmd: &CommandSpec) -> io::Result<i32>;

    /// Whether `name` resolves to an executable on `PATH`.
    fn has_tool(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> io::Result<i32> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        command.envs(cmd.envs.iter().map(|(k, v)| (k, v)));
        if cmd.stdin.is_some() {
            command.stdin(Stdio::piped());
        }
        if cmd.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (&cmd.stdin, child.stdin.take()) {
            match pipe.write_all(input.as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
        let status = child.wait()?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if status.signal() == Some(2) {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    format!("{} was interrupted", cmd.program_name()),
                ));
            }
        }
        Ok(status.code().unwrap_or(-1))
    }
}

/// Dry-run aware front end to a [`CommandRunner`].
#[derive(Clone, Copy)]
pub struct Executor<'a> {
    runner: &'a dyn CommandRunner,
    dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.runner.has_tool(name)
    }

    /// Runs `cmd`, or only logs it in dry-run mode.
    ///
    /// A program that cannot be started is logged and reported as
    /// [`SPAWN_FAILED`]. Only an interruption is returned as an error.
    pub fn run(&self, cmd: &CommandSpec) -> Result<i32, PipelineError> {
        if self.dry_run {
            info!("DRY-RUN: {cmd}");
            return Ok(0);
        }
        debug!("Running: {cmd}");
        match self.runner.run(cmd) {
            Ok(code) => Ok(code),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(PipelineError::Interrupted),
            Err(e) => {
                warn!("Failed to start {}: {e}", cmd.program_name());
                Ok(SPAWN_FAILED)
            }
        }
    }
}

impl fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}
