use archup::commands::{self, Cli};
use archup::job::FinalStatus;
use archup::logging::{self, RunLog};
use archup::{PipelineError, sysexits};
use clap::Parser;
use std::process;

/// Entry point for the archup CLI application.
/// Parses command-line arguments, installs logging and runs one backup.
fn main() {
    let cli = Cli::parse();
    let run_log = RunLog::new();
    if let Err(e) = logging::init(cli.verbose, &run_log) {
        eprintln!("archup: {e:#}");
    }

    match commands::run(&cli, &run_log) {
        Ok(FinalStatus::Success) => {}
        Ok(FinalStatus::Failure) => process::exit(sysexits::EX_TEMPFAIL),
        Err(e) => {
            eprintln!("archup: {e:#}");
            let code = e
                .downcast_ref::<PipelineError>()
                .map(PipelineError::exit_code)
                .unwrap_or(1);
            process::exit(code);
        }
    }
}
