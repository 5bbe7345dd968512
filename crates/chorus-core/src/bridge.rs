//! Backend execution: in-process or in an isolated OS process
//!
//! The orchestrator only sees [`BackendExecution::run`]. Two implementations:
//!
//! - [`InProcessExecution`] builds the adapter and drives a [`BackendRunner`]
//!   in this process.
//! - [`IsolatedExecution`] launches a separate process (by default this same
//!   executable as `chorus-gen worker`) with its own environment, and waits
//!   for it. The child finds its inputs through environment variables, does
//!   its own checkpointing, and reports nothing but its exit status.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{create_backend, SpeechBackend};
use crate::checkpoint::CheckpointStore;
use crate::config::{BackendDescriptor, Config, Isolation, WavEncoding};
use crate::error::BackendError;
use crate::progress::ProgressCallback;
use crate::prompts::Prompts;
use crate::runner::{BackendRunner, RunSummary};

/// Prompt table location for the isolated process
pub const PROMPTS_ENV: &str = "CHORUS_PROMPTS";
/// Output root for the isolated process
pub const OUTPUT_ENV: &str = "CHORUS_OUTPUT_ROOT";
/// Name of the backend the isolated process should run
pub const BACKEND_ENV: &str = "CHORUS_BACKEND";
/// Configuration file for the isolated process
pub const CONFIG_ENV: &str = "CHORUS_CONFIG";

/// Worker exit status: backend ran (item failures included)
pub const EXIT_OK: i32 = 0;
/// Worker exit status: prompt table missing or unreadable
pub const EXIT_PROMPTS_UNAVAILABLE: i32 = 2;
/// Worker exit status: backend failed to load or crashed
pub const EXIT_BACKEND_FAILED: i32 = 3;

/// The prompt list plus the file it came from
///
/// In-process runs use `prompts`; isolated runs hand `path` to the child,
/// which loads the same file itself.
#[derive(Debug, Clone)]
pub struct PromptSource {
    pub path: PathBuf,
    pub prompts: Prompts,
}

/// How a backend execution ended
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Ran in this process, with full counts
    Completed(RunSummary),
    /// Isolated process exited successfully (no per-item detail)
    Exited { code: i32 },
}

/// Runs one backend over the prompt source
pub trait BackendExecution {
    /// Run the backend to completion
    ///
    /// Item failures are part of a successful outcome. `Err` means the backend
    /// as a whole failed (load failure, isolated process failure).
    fn run(
        &self,
        descriptor: &BackendDescriptor,
        source: &PromptSource,
        output_root: &Path,
    ) -> Result<ExecutionOutcome, BackendError>;
}

/// Builds an adapter for a descriptor
pub type BackendFactory = Arc<dyn Fn(&BackendDescriptor) -> Box<dyn SpeechBackend> + Send + Sync>;

/// Runs backends inside the current process
#[derive(Clone)]
pub struct InProcessExecution {
    encoding: WavEncoding,
    progress_interval: usize,
    factory: BackendFactory,
    progress: Option<ProgressCallback>,
}

impl InProcessExecution {
    pub fn new(config: &Config) -> Self {
        Self {
            encoding: config.audio.encoding,
            progress_interval: config.progress_interval,
            factory: Arc::new(create_backend),
            progress: None,
        }
    }

    /// Replace how adapters are built
    pub fn with_factory(mut self, factory: BackendFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl BackendExecution for InProcessExecution {
    fn run(
        &self,
        descriptor: &BackendDescriptor,
        source: &PromptSource,
        output_root: &Path,
    ) -> Result<ExecutionOutcome, BackendError> {
        let store = CheckpointStore::new(output_root, self.encoding);
        let backend = (self.factory)(descriptor);
        BackendRunner::new(descriptor, &store, self.progress_interval)
            .with_progress(self.progress.clone())
            .run(backend.as_ref(), &source.prompts)
            .map(ExecutionOutcome::Completed)
    }
}

/// Runs backends in a separate OS process and waits for it
#[derive(Debug, Clone, Default)]
pub struct IsolatedExecution {
    config_path: Option<PathBuf>,
}

impl IsolatedExecution {
    /// `config_path` is forwarded so the child sees the same configuration
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    fn build_command(
        &self,
        descriptor: &BackendDescriptor,
        source: &PromptSource,
        output_root: &Path,
    ) -> Result<Command, String> {
        let Isolation::Subprocess {
            program,
            args,
            env,
            working_dir,
        } = &descriptor.isolation
        else {
            return Err(String::from("backend is not configured for subprocess isolation"));
        };

        // The child may run in another directory, so hand it absolute paths
        let prompts = source
            .path
            .canonicalize()
            .map_err(|e| format!("prompt file {:?}: {}", source.path, e))?;
        std::fs::create_dir_all(output_root)
            .map_err(|e| format!("output root {:?}: {}", output_root, e))?;
        let output_root = output_root
            .canonicalize()
            .map_err(|e| format!("output root {:?}: {}", output_root, e))?;

        let mut command = match program {
            Some(program) => Command::new(program),
            None => {
                let exe = std::env::current_exe()
                    .map_err(|e| format!("cannot locate current executable: {}", e))?;
                let mut command = Command::new(exe);
                command.arg("worker");
                command
            }
        };
        command
            .args(args)
            .env(PROMPTS_ENV, &prompts)
            .env(OUTPUT_ENV, &output_root)
            .env(BACKEND_ENV, &descriptor.name)
            .envs(env);

        if let Some(config_path) = &self.config_path {
            let config_path = config_path
                .canonicalize()
                .unwrap_or_else(|_| config_path.clone());
            command.env(CONFIG_ENV, config_path);
        }
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

impl BackendExecution for IsolatedExecution {
    fn run(
        &self,
        descriptor: &BackendDescriptor,
        source: &PromptSource,
        output_root: &Path,
    ) -> Result<ExecutionOutcome, BackendError> {
        let process_failure = |reason: String| BackendError::BackendProcessFailure {
            backend: descriptor.name.clone(),
            reason,
        };

        let mut command = self
            .build_command(descriptor, source, output_root)
            .map_err(process_failure)?;

        log::info!(
            "{}: launching isolated process {:?}",
            descriptor.name,
            command.get_program()
        );
        let started = Instant::now();
        let status = command
            .status()
            .map_err(|e| process_failure(format!("failed to launch: {}", e)))?;

        match status.code() {
            Some(EXIT_OK) => {
                log::info!(
                    "{}: isolated process finished in {:.1?}",
                    descriptor.name,
                    started.elapsed()
                );
                Ok(ExecutionOutcome::Exited { code: EXIT_OK })
            }
            Some(code) => Err(process_failure(describe_exit(code))),
            None => Err(process_failure(format!("terminated by signal ({})", status))),
        }
    }
}

fn describe_exit(code: i32) -> String {
    match code {
        EXIT_PROMPTS_UNAVAILABLE => format!("exit code {} (prompt source unavailable)", code),
        EXIT_BACKEND_FAILED => format!("exit code {} (backend failed to load or crashed)", code),
        _ => format!("exit code {}", code),
    }
}
