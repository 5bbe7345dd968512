//! Subcommand implementations

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use chorus_core::bridge::{EXIT_BACKEND_FAILED, EXIT_PROMPTS_UNAVAILABLE};
use chorus_core::config::{default_config_path, PromptConfig};
use chorus_core::prompts::load_prompts_from;
use chorus_core::{
    load_config, load_prompts, resolve_config_path, save_config, BackendExecution,
    BatchOrchestrator, CheckpointStore, Config, ExecutionOutcome, InProcessExecution, ItemOutcome,
    ProgressCallback, PromptSource, RunEvent,
};

use crate::cli::{Cli, Commands, RunArgs, WorkerArgs};

pub fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config_arg = cli.config;
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(config_arg.as_deref(), args),
        Commands::Worker(args) => Ok(worker(config_arg.as_deref(), args)),
        Commands::Status => status(config_arg.as_deref()),
        Commands::InitConfig { path, force } => init_config(path.or(config_arg), force),
    }
}

fn load(config_arg: Option<&Path>) -> Result<(PathBuf, Config)> {
    let path = resolve_config_path(config_arg);
    let config = load_config(&path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    log::info!("Using configuration {:?}", path);
    Ok((path, config))
}

fn prompt_source(prompts: &PromptConfig) -> Result<PromptSource> {
    let texts = load_prompts(prompts).context("Prompt source unavailable")?;
    if texts.is_empty() {
        log::warn!("Prompt table {:?} has no rows", prompts.path);
    }
    Ok(PromptSource {
        path: prompts.path.clone(),
        prompts: texts,
    })
}

/// Per-prompt progress lines (RUST_LOG=debug)
fn progress_logger() -> ProgressCallback {
    Arc::new(|event: &RunEvent<'_>| {
        if let RunEvent::ItemFinished {
            backend,
            index,
            total,
            outcome,
        } = event
        {
            let label = match outcome {
                ItemOutcome::Generated { .. } => "generated",
                ItemOutcome::Skipped { .. } => "skipped",
                ItemOutcome::Failed { .. } => "failed",
            };
            log::debug!("{}: [{}/{}] {}", backend, index + 1, total, label);
        }
    })
}

fn run(config_arg: Option<&Path>, args: RunArgs) -> Result<ExitCode> {
    let (config_path, config) = load(config_arg)?;

    for name in &args.backends {
        if config.backend(name).is_none() {
            bail!("Unknown backend {:?} (not in configuration)", name);
        }
    }

    let source = prompt_source(&config.prompts)?;
    log::info!("Loaded {} prompts from {:?}", source.prompts.len(), source.path);

    let report = BatchOrchestrator::new(&config, Some(config_path))
        .with_in_process(InProcessExecution::new(&config).with_progress(progress_logger()))
        .with_selection(args.backends)
        .run(&source);

    if let Some(report_path) = args.report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(&report_path, json)
            .with_context(|| format!("Failed to write report to {:?}", report_path))?;
        log::info!("Report written to {:?}", report_path);
    }

    let failed = report.failed_backends().count();
    if failed > 0 {
        log::warn!(
            "{} of {} backends failed; their outputs are incomplete",
            failed,
            report.backends.len()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Isolated-process entry point
///
/// Reports through the exit status only, since no structured data goes back
/// to the parent.
fn worker(config_arg: Option<&Path>, args: WorkerArgs) -> ExitCode {
    let failed = ExitCode::from(EXIT_BACKEND_FAILED as u8);

    let config = match load(config_arg) {
        Ok((_, config)) => config,
        Err(e) => {
            log::error!("worker: {:#}", e);
            return failed;
        }
    };
    let Some(descriptor) = config.backend(&args.backend) else {
        log::error!("worker: unknown backend {:?}", args.backend);
        return failed;
    };

    let prompt_path = args.prompts.unwrap_or_else(|| config.prompts.path.clone());
    let prompts = match load_prompts_from(
        &prompt_path,
        &config.prompts.text_column,
        config.prompts.max_prompts,
    ) {
        Ok(prompts) => prompts,
        Err(e) => {
            log::error!("worker: {}", e);
            return ExitCode::from(EXIT_PROMPTS_UNAVAILABLE as u8);
        }
    };
    let source = PromptSource {
        path: prompt_path,
        prompts,
    };
    let output_root = args
        .output_root
        .unwrap_or_else(|| config.output_root.clone());

    log::info!(
        "worker: running {} over {} prompts into {:?}",
        descriptor.name,
        source.prompts.len(),
        output_root
    );
    let execution = InProcessExecution::new(&config).with_progress(progress_logger());
    let result = catch_unwind(AssertUnwindSafe(|| {
        execution.run(descriptor, &source, &output_root)
    }));

    match result {
        Ok(Ok(ExecutionOutcome::Completed(summary))) if summary.aborted.is_some() => failed,
        Ok(Ok(_)) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            log::error!("worker: {}", e.detailed());
            failed
        }
        Err(_) => {
            log::error!("worker: {} crashed", descriptor.name);
            failed
        }
    }
}

fn status(config_arg: Option<&Path>) -> Result<ExitCode> {
    let (_, config) = load(config_arg)?;
    let source = prompt_source(&config.prompts)?;
    let total = source.prompts.len();
    let store = CheckpointStore::new(&config.output_root, config.audio.encoding);

    println!("{} prompts, output {}", total, config.output_root.display());
    for descriptor in &config.backends {
        let done = store.completed(descriptor.output_dir_name(), total);
        let mut notes = Vec::new();
        if !descriptor.enabled {
            notes.push("disabled");
        }
        if descriptor.is_isolated() {
            notes.push("isolated");
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("  ({})", notes.join(", "))
        };
        println!("{:<16} {:>6}/{}{}", descriptor.name, done, total, notes);
    }
    Ok(ExitCode::SUCCESS)
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<ExitCode> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    save_config(&Config::default(), &path)
        .with_context(|| format!("Failed to write default configuration to {:?}", path))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}
