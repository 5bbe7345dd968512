//! chorus-gen - batch speech dataset generation
//!
//! Thin front end over `chorus-core`: parses arguments, loads the
//! configuration and prompt table, and hands off to the batch orchestrator.
//! Also hosts the `worker` subcommand that isolated backends run in.
//!
//! Set RUST_LOG=debug for per-item detail.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;

use cli::Cli;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match commands::dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
