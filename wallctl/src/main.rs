//! wallctl: command-line control for the wallrotate daemon.
//!
//! Every command is a request against the daemon's local control panel.

mod commands;
mod error;

use clap::Parser;
use commands::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = cli.execute().await {
        eprintln!("wallctl: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
