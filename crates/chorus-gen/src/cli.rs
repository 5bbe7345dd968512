//! Command-line definition

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};

use chorus_core::bridge::{BACKEND_ENV, CONFIG_ENV, OUTPUT_ENV, PROMPTS_ENV};

/// Batch-generate a synthetic speech dataset from a prompt table.
///
/// Every configured TTS backend synthesises every prompt into
/// `{output_root}/{backend}/sample_{index}.wav`. Reruns skip files that
/// already exist, so an interrupted batch resumes where it stopped.
///
/// Examples:
///   chorus-gen                              # run every enabled backend
///   chorus-gen run --backend qwen3          # run one backend
///   chorus-gen status                       # completed/total per backend
///   chorus-gen init-config --path chorus.yaml
#[derive(Debug, Parser)]
#[command(name = "chorus-gen")]
#[command(version)]
#[command(about = "Batch-generate a synthetic speech dataset from a prompt table")]
pub struct Cli {
    /// Configuration file (default: ./chorus.yaml, then the user config directory).
    #[arg(
        long,
        short,
        global = true,
        env = CONFIG_ENV,
        value_name = "FILE",
        value_hint = ValueHint::FilePath
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the configured backends over the prompt table (default).
    Run(RunArgs),

    /// Run a single backend in this process (entry point for isolated backends).
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Show completed/total outputs per backend.
    Status,

    /// Write the default configuration file.
    InitConfig {
        /// Where to write (default: the --config path, or the user config directory).
        #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        path: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Only run this backend (repeatable). Configured order is kept.
    #[arg(long = "backend", value_name = "NAME")]
    pub backends: Vec<String>,

    /// Write a JSON report of the batch to this file.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Backend to run.
    #[arg(long, env = BACKEND_ENV, value_name = "NAME")]
    pub backend: String,

    /// Prompt table (default: from the configuration).
    #[arg(long, env = PROMPTS_ENV, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub prompts: Option<PathBuf>,

    /// Output root (default: from the configuration).
    #[arg(long, env = OUTPUT_ENV, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub output_root: Option<PathBuf>,
}
