//! mr-upgrade entry point
//!
//! Parses arguments, sets up logging and runs the selected mode. Stage failures are
//! reported by the command itself and surface only as the exit code here; anything
//! else that escapes is shown with [`user_friendly_error`] and exits with 1.
//!
//! Usage errors also exit with 1. Exit code 2 belongs to a failed Probing stage, so
//! clap's own exit path is not used.

use clap::Parser;
use mr_upgrade::cli::Cli;
use mr_upgrade::core::user_friendly_error;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version come through here too, on stdout.
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    // RUST_LOG wins over -v/-q.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            user_friendly_error(e).display();
            ExitCode::FAILURE
        }
    }
}
