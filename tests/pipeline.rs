use archup::PipelineError;
use archup::commands::run_backup;
use archup::config::EffectiveConfig;
use archup::exec::{CommandRunner, CommandSpec, SystemRunner};
use archup::file_util::{part_path, verify_zip};
use archup::job::{ArchiveFormat, ArchiveJob, FinalStatus, SplitRetention, UploadTool};
use archup::logging::RunLog;
use archup::upload::Sleeper;
use rand::RngExt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

type Handler = Box<dyn Fn(&CommandSpec) -> i32>;

/// Records every command and answers with `handler` instead of spawning.
struct FakeRunner {
    tools: Vec<&'static str>,
    calls: RefCell<Vec<CommandSpec>>,
    handler: Handler,
}

impl FakeRunner {
    fn new(tools: &[&'static str], handler: impl Fn(&CommandSpec) -> i32 + 'static) -> Self {
        Self {
            tools: tools.to_vec(),
            calls: RefCell::new(vec![]),
            handler: Box::new(handler),
        }
    }

    fn calls_named(&self, program: &str) -> Vec<CommandSpec> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program_name() == program)
            .cloned()
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, cmd: &CommandSpec) -> io::Result<i32> {
        self.calls.borrow_mut().push(cmd.clone());
        Ok((self.handler)(cmd))
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| *t == name)
    }
}

#[derive(Default)]
struct NoSleep {
    slept: RefCell<Vec<Duration>>,
}

impl Sleeper for NoSleep {
    fn sleep(&self, duration: Duration) -> Result<(), PipelineError> {
        self.slept.borrow_mut().push(duration);
        Ok(())
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random_range(0..=u8::MAX)).collect()
}

/// Archiver stand-in writing `content` to the path that follows `-cf`.
fn fake_tar(content: Vec<u8>) -> impl Fn(&CommandSpec) -> i32 {
    move |cmd| {
        let args = cmd.get_args();
        match args.iter().position(|a| a == "-cf") {
            Some(i) => {
                fs::write(&args[i + 1], &content).unwrap();
                0
            }
            None => 1,
        }
    }
}

fn sources(root: &Path) -> Vec<PathBuf> {
    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("notes.txt"), "backup me").unwrap();
    fs::write(root.join("todo.md"), "- [ ] nothing").unwrap();
    vec![docs, root.join("todo.md")]
}

#[test]
fn zip_without_extras_produces_one_archive() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let config = EffectiveConfig::default();
    let runner = FakeRunner::new(&["zip"], |cmd| {
        let args = cmd.get_args();
        fs::write(&args[1], b"PK").unwrap();
        0
    });

    let report = run_backup(
        &config,
        &sources(dir.path()),
        ArchiveJob::new(out.clone(), "plain"),
        None,
        &runner,
        &NoSleep::default(),
        &RunLog::new(),
    )
    .unwrap();

    assert_eq!(report.status(), FinalStatus::Success);
    assert_eq!(report.job.primary_output, out.join("plain.zip"));
    assert_eq!(report.job.files_to_upload, vec![out.join("plain.zip")]);
    assert!(report.uploads.outcomes.is_empty());
    let mut names: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["plain.log", "plain.zip"]);
}

#[test]
fn zip_with_system_tools() {
    if which::which("zip").is_err() {
        return;
    }
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let config = EffectiveConfig::default();

    let report = run_backup(
        &config,
        &sources(dir.path()),
        ArchiveJob::new(out.clone(), "real"),
        None,
        &SystemRunner,
        &NoSleep::default(),
        &RunLog::new(),
    )
    .unwrap();

    assert_eq!(report.status(), FinalStatus::Success);
    assert_eq!(report.job.files_to_upload, vec![out.join("real.zip")]);
    assert!(verify_zip(&out.join("real.zip"), false).unwrap() >= 2);
    assert!(!out.join("real.zip.sha256").exists());
}

#[test]
fn tgz_split_keeps_original() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let config = EffectiveConfig {
        format: ArchiveFormat::Tgz,
        split_size: Some("1m".into()),
        split_retention: SplitRetention::KeepBoth,
        ..EffectiveConfig::default()
    };
    let content = random_bytes(2 * 1024 * 1024 + 512 * 1024);
    let runner = FakeRunner::new(&["tar"], fake_tar(content.clone()));

    let report = run_backup(
        &config,
        &sources(dir.path()),
        ArchiveJob::new(out.clone(), "big"),
        None,
        &runner,
        &NoSleep::default(),
        &RunLog::new(),
    )
    .unwrap();

    let primary = out.join("big.tar.gz");
    let expected: Vec<PathBuf> = (0..3)
        .map(|i| part_path(&primary, i))
        .chain(std::iter::once(primary.clone()))
        .collect();
    assert_eq!(report.job.files_to_upload, expected);

    let sizes: Vec<u64> = expected[..3]
        .iter()
        .map(|p| fs::metadata(p).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![1024 * 1024, 1024 * 1024, 512 * 1024]);

    let mut joined = vec![];
    for part in &expected[..3] {
        joined.extend(fs::read(part).unwrap());
    }
    assert_eq!(joined, content);
    assert_eq!(report.event.total_size, "5.0 MB");
}

#[cfg(unix)]
#[test]
fn failing_upload_fires_on_failure() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let plugins = dir.path().join("plugins.d");
    fs::create_dir_all(&plugins).unwrap();
    fs::write(plugins.join("record.sh"), "#!/bin/sh\n").unwrap();

    let config = EffectiveConfig {
        format: ArchiveFormat::Tar,
        upload_target: Some("remote:backups".into()),
        upload_tool: UploadTool::Rclone,
        upload_retry: 3,
        plugins_dir: plugins.clone(),
        notify_targets: vec!["record".into()],
        notify_config: "team=infra".into(),
        ..EffectiveConfig::default()
    };
    let runner = FakeRunner::new(&["tar", "rclone"], |cmd| match cmd.program_name().as_str() {
        "rclone" => 1,
        "tar" => fake_tar(b"tarball".to_vec())(cmd),
        _ => 0,
    });
    let sleeper = NoSleep::default();

    let report = run_backup(
        &config,
        &sources(dir.path()),
        ArchiveJob::new(out.clone(), "nightly"),
        None,
        &runner,
        &sleeper,
        &RunLog::new(),
    )
    .unwrap();

    assert_eq!(report.status(), FinalStatus::Failure);
    assert_eq!(report.uploads.outcomes.len(), 1);
    assert_eq!(report.uploads.outcomes[0].attempts, 3);
    assert_eq!(runner.calls_named("rclone").len(), 3);
    assert_eq!(
        *sleeper.slept.borrow(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );

    let plugin_calls = runner.calls_named("sh");
    assert_eq!(plugin_calls.len(), 1);
    let env: HashMap<String, String> = plugin_calls[0]
        .get_envs()
        .iter()
        .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(env["EVENT"], "on_failure");
    assert_eq!(env["STATUS"], "failure");
    assert_eq!(env["ARCHIVE_PATH"], out.join("nightly.tar").display().to_string());
    assert_eq!(env["FILES"], out.join("nightly.tar").display().to_string());
    assert_eq!(env["UPLOAD_TARGET"], "remote:backups");
    assert_eq!(env["NOTIFY_CONFIG"], "team=infra");
    assert_eq!(env["LOG_FILE"], out.join("nightly.log").display().to_string());
    assert_eq!(env["DRY_RUN"], "0");
    assert!(out.join("nightly.tar").exists());
}

#[test]
fn upload_then_remove_reports_size_before_removal() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let config = EffectiveConfig {
        format: ArchiveFormat::Tar,
        upload_target: Some("s3://bucket/backups/".into()),
        after_upload_rm: true,
        ..EffectiveConfig::default()
    };
    let runner = FakeRunner::new(&["tar", "aws"], |cmd| match cmd.program_name().as_str() {
        "tar" => fake_tar(vec![1u8; 2048])(cmd),
        "aws" => 0,
        _ => 1,
    });

    let report = run_backup(
        &config,
        &sources(dir.path()),
        ArchiveJob::new(out.clone(), "sync"),
        None,
        &runner,
        &NoSleep::default(),
        &RunLog::new(),
    )
    .unwrap();

    assert_eq!(report.status(), FinalStatus::Success);
    assert!(report.uploads.outcomes[0].succeeded);
    let aws = runner.calls_named("aws");
    assert_eq!(aws.len(), 1);
    assert_eq!(aws[0].args_lossy()[..2], ["s3", "cp"]);
    assert!(!out.join("sync.tar").exists());
    assert_eq!(report.event.total_size, "2.0 KB");
}

#[test]
fn dry_run_changes_nothing() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let config = EffectiveConfig {
        format: ArchiveFormat::SevenZ,
        zip_encrypt: true,
        split_size: Some("10m".into()),
        make_checksum: true,
        make_summary: true,
        upload_target: Some("remote:x".into()),
        after_upload_rm: true,
        notify_targets: vec!["record".into()],
        plugins_dir: dir.path().to_path_buf(),
        dry_run: true,
        ..EffectiveConfig::default()
    };
    fs::write(dir.path().join("record.sh"), "#!/bin/sh\n").unwrap();
    let srcs = sources(dir.path());
    let before: Vec<_> = srcs.iter().map(|p| p.exists()).collect();
    let runner = FakeRunner::new(&["7z", "rclone"], |cmd| {
        panic!("dry run executed {cmd}");
    });

    let report = run_backup(
        &config,
        &srcs,
        ArchiveJob::new(out.clone(), "preview"),
        None,
        &runner,
        &NoSleep::default(),
        &RunLog::new(),
    )
    .unwrap();

    assert!(!out.exists());
    assert!(runner.calls.borrow().is_empty());
    assert_eq!(report.status(), FinalStatus::Success);
    assert_eq!(report.job.files_to_upload, vec![out.join("preview.7z")]);
    assert_eq!(report.event.total_size, "(estimasi)");
    assert!(report.event.dry_run);
    assert_eq!(srcs.iter().map(|p| p.exists()).collect::<Vec<_>>(), before);
}

#[test]
fn missing_archiver_is_unavailable() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out");
    let config = EffectiveConfig {
        format: ArchiveFormat::SevenZ,
        notify_targets: vec!["record".into()],
        ..EffectiveConfig::default()
    };
    let runner = FakeRunner::new(&[], |_| 0);

    let err = run_backup(
        &config,
        &sources(dir.path()),
        ArchiveJob::new(out, "none"),
        None,
        &runner,
        &NoSleep::default(),
        &RunLog::new(),
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::MissingTool { tool: "7z", .. }));
    assert_eq!(err.exit_code(), archup::sysexits::EX_UNAVAILABLE);
    assert!(runner.calls.borrow().is_empty());
}
