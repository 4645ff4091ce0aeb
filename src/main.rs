use clap::{CommandFactory, Parser};
use mac_filter::app::{self, RunStatus};
use mac_filter::cli::Cli;
use mac_filter::config::default_store_dir;
use mac_filter::platform;
use mac_filter::FilterError;
use std::process::ExitCode;
use tracing::Level;

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let dir = match cli.dir.clone() {
        Some(dir) => dir,
        None => match default_store_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let mut stdout = std::io::stdout().lock();
    match app::run(&cli, &dir, platform::connect, &mut stdout) {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::VerifyFailed) => ExitCode::FAILURE,
        Err(e @ FilterError::MissingParameter(_)) => {
            eprintln!("Error: {e}\n");
            let _ = Cli::command().print_help();
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
