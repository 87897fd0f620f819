//! Upload dispatcher with bounded retry and capped exponential backoff.

use crate::error::PipelineError;
use crate::exec::{CommandSpec, Executor};
use crate::job::{FinalStatus, UploadTool};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{error, info, warn};

/// Delay after the first failed attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
/// Upper bound of any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

const SFTP_SCHEME: &str = "sftp://";
const S3_SCHEME: &str = "s3://";

/// Concrete upload program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Rclone,
    Aws,
    Lftp,
    Scp,
}

impl Transfer {
    pub fn program(&self) -> &'static str {
        match self {
            Transfer::Rclone => "rclone",
            Transfer::Aws => "aws",
            Transfer::Lftp => "lftp",
            Transfer::Scp => "scp",
        }
    }

    /// Command copying `file` to `target`.
    pub fn command(&self, file: &Path, target: &str) -> CommandSpec {
        match self {
            Transfer::Rclone => CommandSpec::new("rclone")
                .arg("copy")
                .arg(file)
                .arg(target)
                .arg("--progress"),
            Transfer::Aws => CommandSpec::new("aws")
                .args(["s3", "cp"])
                .arg(file)
                .arg(target),
            Transfer::Lftp => CommandSpec::new("lftp").arg("-c").arg(format!(
                "open '{target}'; put -O . '{}'; bye",
                file.display()
            )),
            Transfer::Scp => CommandSpec::new("scp")
                .arg(file)
                .arg(target.strip_prefix(SFTP_SCHEME).unwrap_or(target)),
        }
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Picks the upload program for `target`.
///
/// `auto` prefers rclone, then aws for `s3://` targets, then lftp, then scp
/// for `sftp://` targets, and finally rclone even when it is not installed.
pub fn select_tool(requested: UploadTool, target: &str, has_tool: impl Fn(&str) -> bool) -> Transfer {
    match requested {
        UploadTool::Rclone => Transfer::Rclone,
        UploadTool::Aws => Transfer::Aws,
        UploadTool::Lftp => Transfer::Lftp,
        UploadTool::Scp => Transfer::Scp,
        UploadTool::Auto => {
            if has_tool("rclone") {
                Transfer::Rclone
            } else if target.starts_with(S3_SCHEME) && has_tool("aws") {
                Transfer::Aws
            } else if has_tool("lftp") {
                Transfer::Lftp
            } else if target.starts_with(SFTP_SCHEME) {
                Transfer::Scp
            } else {
                Transfer::Rclone
            }
        }
    }
}

/// Doubling delays starting at [`INITIAL_BACKOFF`], capped at [`MAX_BACKOFF`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Waits between upload attempts.
pub trait Sleeper {
    /// Sleeps for `duration`. Returns [`PipelineError::Interrupted`] when the
    /// wait was cut short by Ctrl-C.
    fn sleep(&self, duration: Duration) -> Result<(), PipelineError>;
}

/// Sleeps on a current-thread runtime, racing a Ctrl-C listener.
#[derive(Debug)]
pub struct InterruptibleSleeper {
    runtime: Runtime,
}

impl InterruptibleSleeper {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime })
    }
}

impl Sleeper for InterruptibleSleeper {
    fn sleep(&self, duration: Duration) -> Result<(), PipelineError> {
        self.runtime.block_on(async {
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = tokio::signal::ctrl_c() => Err(PipelineError::Interrupted),
            }
        })
    }
}

/// Result of uploading one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub succeeded: bool,
    pub attempts: u32,
}

/// Aggregate result of the upload stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub status: FinalStatus,
    pub outcomes: Vec<UploadOutcome>,
}

impl UploadReport {
    fn from_outcomes(outcomes: Vec<UploadOutcome>) -> Self {
        let status = if outcomes.iter().all(|o| o.succeeded) {
            FinalStatus::Success
        } else {
            FinalStatus::Failure
        };
        Self { status, outcomes }
    }
}

pub struct UploadDispatcher<'a> {
    exec: Executor<'a>,
    sleeper: &'a dyn Sleeper,
    remove_after: bool,
}

impl<'a> UploadDispatcher<'a> {
    pub fn new(exec: Executor<'a>, sleeper: &'a dyn Sleeper, remove_after: bool) -> Self {
        Self {
            exec,
            sleeper,
            remove_after,
        }
    }

    /// Uploads `files` in order, each with up to `max_retries` attempts.
    /// A budget of zero attempts fails every file without running anything.
    ///
    /// Without a target nothing is uploaded and the status is success.
    /// Files missing from disk are skipped. Only an interruption is an error;
    /// failed uploads are reported through the returned status.
    pub fn upload_all(
        &self,
        files: &[PathBuf],
        target: Option<&str>,
        tool: UploadTool,
        max_retries: u32,
    ) -> Result<UploadReport, PipelineError> {
        let Some(target) = target.filter(|t| !t.is_empty()) else {
            return Ok(UploadReport::from_outcomes(vec![]));
        };
        let transfer = select_tool(tool, target, |name| self.exec.has_tool(name));
        info!("Uploading with {transfer} to {target}");

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            if !self.exec.is_dry_run() && !file.exists() {
                warn!("Skipping upload of missing file {}", file.display());
                continue;
            }
            outcomes.push(self.upload_one(transfer, file, target, max_retries)?);
        }
        Ok(UploadReport::from_outcomes(outcomes))
    }

    fn upload_one(
        &self,
        transfer: Transfer,
        file: &Path,
        target: &str,
        attempts: u32,
    ) -> Result<UploadOutcome, PipelineError> {
        let mut backoff = Backoff::default();
        for attempt in 1..=attempts {
            info!("Attempt {attempt}/{attempts}: {}", file.display());
            let code = self.exec.run(&transfer.command(file, target))?;
            if code == 0 {
                info!("Uploaded {} to {target}", file.display());
                if transfer == Transfer::Rclone && !self.exec.is_dry_run() {
                    self.verify_rclone(file, target)?;
                }
                if self.remove_after {
                    self.remove_local(file);
                }
                return Ok(UploadOutcome {
                    path: file.to_path_buf(),
                    succeeded: true,
                    attempts: attempt,
                });
            }
            warn!("Upload failed ({transfer}, exit code {code})");
            if attempt < attempts {
                let delay = backoff.next_delay();
                info!("Retrying in {}s", delay.as_secs());
                self.sleeper.sleep(delay)?;
            }
        }
        error!("Upload of {} failed after {attempts} attempts", file.display());
        Ok(UploadOutcome {
            path: file.to_path_buf(),
            succeeded: false,
            attempts,
        })
    }

    fn verify_rclone(&self, file: &Path, target: &str) -> Result<(), PipelineError> {
        let check = CommandSpec::new("rclone")
            .arg("check")
            .arg(file)
            .arg(target)
            .arg("--size-only")
            .quiet();
        match self.exec.run(&check)? {
            0 => info!("rclone size check passed"),
            code => warn!("rclone size check reported differences (exit code {code})"),
        }
        Ok(())
    }

    fn remove_local(&self, file: &Path) {
        if self.exec.is_dry_run() {
            info!("DRY-RUN: remove {}", file.display());
            return;
        }
        match fs::remove_file(file) {
            Ok(()) => info!("Removed local file {}", file.display()),
            Err(e) => warn!("Cannot remove '{}': {e}", file.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandRunner;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct ScriptedRunner {
        tools: Vec<&'static str>,
        codes: RefCell<VecDeque<i32>>,
        calls: RefCell<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(tools: &[&'static str], codes: &[i32]) -> Self {
            Self {
                tools: tools.to_vec(),
                codes: RefCell::new(codes.iter().copied().collect()),
                calls: RefCell::new(vec![]),
            }
        }

        fn calls_to(&self, sub: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.get_args().first().is_some_and(|a| a == sub))
                .count()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, cmd: &CommandSpec) -> io::Result<i32> {
            self.calls.borrow_mut().push(cmd.clone());
            Ok(self.codes.borrow_mut().pop_front().unwrap_or(0))
        }

        fn has_tool(&self, name: &str) -> bool {
            self.tools.iter().any(|t| *t == name)
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: RefCell<Vec<Duration>>,
        interrupt: bool,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> Result<(), PipelineError> {
            self.slept.borrow_mut().push(duration);
            if self.interrupt {
                Err(PipelineError::Interrupted)
            } else {
                Ok(())
            }
        }
    }

    fn artifact(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"payload").unwrap();
        path
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }

    fn only(names: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |t| names.iter().any(|n| *n == t)
    }

    #[test]
    fn test_auto_tool_selection() {
        assert_eq!(
            select_tool(UploadTool::Auto, "s3://b/p", only(&["rclone", "aws"])),
            Transfer::Rclone
        );
        assert_eq!(select_tool(UploadTool::Auto, "s3://b/p", only(&["aws"])), Transfer::Aws);
        assert_eq!(select_tool(UploadTool::Auto, "remote:p", only(&["aws"])), Transfer::Rclone);
        assert_eq!(select_tool(UploadTool::Auto, "ftp://h/", only(&["lftp"])), Transfer::Lftp);
        assert_eq!(select_tool(UploadTool::Auto, "sftp://h:/p", only(&[])), Transfer::Scp);
        assert_eq!(select_tool(UploadTool::Auto, "remote:p", only(&[])), Transfer::Rclone);
        assert_eq!(select_tool(UploadTool::Scp, "remote:p", only(&["rclone"])), Transfer::Scp);
    }

    #[test]
    fn test_transfer_commands() {
        let file = Path::new("/out/a.zip");
        assert_eq!(
            Transfer::Rclone.command(file, "remote:bk").to_string(),
            "rclone copy /out/a.zip remote:bk --progress"
        );
        assert_eq!(
            Transfer::Aws.command(file, "s3://b/k").args_lossy(),
            vec!["s3", "cp", "/out/a.zip", "s3://b/k"]
        );
        assert_eq!(
            Transfer::Lftp.command(file, "ftp://h/dir").args_lossy(),
            vec!["-c", "open 'ftp://h/dir'; put -O . '/out/a.zip'; bye"]
        );
        assert_eq!(
            Transfer::Scp.command(file, "sftp://user@h:/srv").args_lossy(),
            vec!["/out/a.zip", "user@h:/srv"]
        );
    }

    #[test]
    fn test_no_target_is_success() {
        let runner = ScriptedRunner::new(&["rclone"], &[]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, false);
        let report = dispatcher
            .upload_all(&[PathBuf::from("/nope")], None, UploadTool::Auto, 3)
            .unwrap();
        assert_eq!(report.status, FinalStatus::Success);
        assert!(report.outcomes.is_empty());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_exhausted_retries_fail_with_backoff() {
        let dir = tempdir().unwrap();
        let file = artifact(dir.path(), "a.zip");
        let runner = ScriptedRunner::new(&["rclone"], &[1, 1, 1]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, false);

        let report = dispatcher
            .upload_all(&[file.clone()], Some("remote:bk"), UploadTool::Auto, 3)
            .unwrap();

        assert_eq!(report.status, FinalStatus::Failure);
        assert_eq!(
            report.outcomes,
            vec![UploadOutcome {
                path: file,
                succeeded: false,
                attempts: 3
            }]
        );
        assert_eq!(runner.calls_to("copy"), 3);
        assert_eq!(runner.calls_to("check"), 0);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_success_after_retry_verifies_and_removes() {
        let dir = tempdir().unwrap();
        let file = artifact(dir.path(), "a.zip");
        let runner = ScriptedRunner::new(&["rclone"], &[1, 0, 0]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, true);

        let report = dispatcher
            .upload_all(&[file.clone()], Some("remote:bk"), UploadTool::Rclone, 3)
            .unwrap();

        assert_eq!(report.status, FinalStatus::Success);
        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(runner.calls_to("check"), 1);
        assert!(runner.calls.borrow()[2].is_quiet());
        assert!(!file.exists());
    }

    #[test]
    fn test_one_failed_file_fails_the_run() {
        let dir = tempdir().unwrap();
        let a = artifact(dir.path(), "a.part.000");
        let b = artifact(dir.path(), "a.part.001");
        let runner = ScriptedRunner::new(&["aws"], &[0, 1]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, false);

        let report = dispatcher
            .upload_all(&[a, b], Some("s3://bucket/x"), UploadTool::Auto, 1)
            .unwrap();

        assert_eq!(report.status, FinalStatus::Failure);
        assert!(report.outcomes[0].succeeded);
        assert!(!report.outcomes[1].succeeded);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempdir().unwrap();
        let present = artifact(dir.path(), "a.zip");
        let runner = ScriptedRunner::new(&["rclone"], &[0, 0]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, false);

        let report = dispatcher
            .upload_all(
                &[dir.path().join("gone.zip"), present.clone()],
                Some("remote:bk"),
                UploadTool::Rclone,
                3,
            )
            .unwrap();

        assert_eq!(report.status, FinalStatus::Success);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].path, present);
    }

    #[test]
    fn test_interrupted_backoff_aborts() {
        let dir = tempdir().unwrap();
        let file = artifact(dir.path(), "a.zip");
        let runner = ScriptedRunner::new(&["rclone"], &[1, 1, 1]);
        let sleeper = RecordingSleeper {
            interrupt: true,
            ..RecordingSleeper::default()
        };
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, false);

        let err = dispatcher
            .upload_all(&[file], Some("remote:bk"), UploadTool::Rclone, 3)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted));
        assert_eq!(runner.calls_to("copy"), 1);
    }

    #[test]
    fn test_dry_run_uploads_listed_files_without_running() {
        let runner = ScriptedRunner::new(&["rclone"], &[1]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, true), &sleeper, true);

        let report = dispatcher
            .upload_all(&[PathBuf::from("/not/created.zip")], Some("remote:bk"), UploadTool::Auto, 3)
            .unwrap();

        assert_eq!(report.status, FinalStatus::Success);
        assert_eq!(report.outcomes[0].attempts, 1);
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_zero_retries_never_attempts() {
        let dir = tempdir().unwrap();
        let file = artifact(dir.path(), "a.zip");
        let runner = ScriptedRunner::new(&["rclone"], &[1]);
        let sleeper = RecordingSleeper::default();
        let dispatcher = UploadDispatcher::new(Executor::new(&runner, false), &sleeper, true);
        let report = dispatcher
            .upload_all(&[file.clone()], Some("remote:bk"), UploadTool::Rclone, 0)
            .unwrap();
        assert_eq!(report.status, FinalStatus::Failure);
        assert_eq!(
            report.outcomes,
            vec![UploadOutcome {
                path: file.clone(),
                succeeded: false,
                attempts: 0
            }]
        );
        assert!(runner.calls.borrow().is_empty());
        assert!(sleeper.slept.borrow().is_empty());
        assert!(file.exists());
    }
}
