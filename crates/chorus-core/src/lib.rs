//! Chorus Core - resumable batch speech generation
//!
//! Routes one fixed prompt list through several text-to-speech backends and
//! writes one WAV per prompt per backend to a predictable location:
//! `{output_root}/{backend}/sample_{index}.wav`.
//!
//! The models themselves are opaque external collaborators. This crate owns
//! the scheduling and resilience around them:
//!
//! 1. **Backend adapters** ([`backend`]): a uniform load/generate/release contract
//!    over long-lived worker processes and one-shot synthesiser commands.
//!
//! 2. **Checkpoint store** ([`checkpoint`]): the output file *is* the checkpoint.
//!    Files are written to a temp path and renamed, so a present file is a
//!    complete file.
//!
//! 3. **Per-item executor** ([`executor`]) and **backend runner** ([`runner`]):
//!    load once, generate N times in prompt order, release exactly once,
//!    with item failures contained to the item.
//!
//! 4. **Isolation bridge** ([`bridge`]): runs a backend in a separate OS process
//!    when its dependencies cannot live in the host environment.
//!
//! 5. **Batch orchestrator** ([`orchestrator`]): runs every configured backend in
//!    order, and one backend's total failure never stops the next.

pub mod audio;
pub mod backend;
pub mod bridge;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod runner;

pub use audio::AudioBuffer;
pub use backend::{create_backend, ModelHandle, SpeechBackend};
pub use bridge::{
    BackendExecution, ExecutionOutcome, InProcessExecution, IsolatedExecution, PromptSource,
};
pub use checkpoint::CheckpointStore;
pub use config::{
    load_config, resolve_config_path, save_config, BackendDescriptor, Config, EngineSpec,
    Isolation, WavEncoding,
};
pub use error::{BackendError, ConfigError, PromptError};
pub use executor::{ItemExecutor, ItemOutcome};
pub use orchestrator::{BackendReport, BackendStatus, BatchOrchestrator, BatchReport};
pub use progress::{ProgressCallback, RunEvent};
pub use prompts::{load_prompts, Prompts};
pub use runner::{BackendRunner, ItemFailure, RunCounts, RunSummary, RunnerState};
