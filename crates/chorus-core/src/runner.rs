//! Backend runner
//!
//! Drives one backend over the whole prompt list:
//!
//! ```text
//! NotLoaded ──load ok──▶ Loaded ──loop done──▶ Draining ──release──▶ Released
//!     │
//!     └──load err──▶ LoadFailed
//! ```
//!
//! The model is loaded once, every prompt goes through the [`ItemExecutor`] in
//! index order, and the handle is released exactly once. A panic inside the
//! loop stops the run: the model is still released and the summary keeps the
//! counts reached so far, with [`RunSummary::aborted`] set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::{ModelHandle, SpeechBackend};
use crate::checkpoint::CheckpointStore;
use crate::config::BackendDescriptor;
use crate::error::BackendError;
use crate::executor::{ItemExecutor, ItemOutcome};
use crate::progress::{ProgressCallback, RunEvent};
use crate::prompts::Prompts;

/// Lifecycle of one backend run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    NotLoaded,
    Loaded,
    Draining,
    Released,
    LoadFailed,
}

/// Per-backend tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

impl RunCounts {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Generated { .. } => self.generated += 1,
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// One prompt that failed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub index: usize,
    pub reason: String,
}

/// What one backend run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub backend: String,
    pub counts: RunCounts,
    pub state: RunnerState,
    pub failures: Vec<ItemFailure>,
    pub elapsed: Duration,
    /// Set when the loop was cut short by a panic
    pub aborted: Option<String>,
}

/// Releases the model when dropped, including during a panic
struct ReleaseGuard<'a> {
    backend: &'a str,
    handle: Option<Box<dyn ModelHandle>>,
}

impl ReleaseGuard<'_> {
    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::debug!("{}: releasing model", self.backend);
            handle.release();
        }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::warn!("{}: run aborted, releasing model", self.backend);
            self.release();
        }
    }
}

/// Runs one backend over the prompt list
pub struct BackendRunner<'a> {
    descriptor: &'a BackendDescriptor,
    store: &'a CheckpointStore,
    progress_interval: usize,
    progress: Option<ProgressCallback>,
    state: RunnerState,
}

impl<'a> BackendRunner<'a> {
    pub fn new(
        descriptor: &'a BackendDescriptor,
        store: &'a CheckpointStore,
        progress_interval: usize,
    ) -> Self {
        Self {
            descriptor,
            store,
            progress_interval: progress_interval.max(1),
            progress: None,
            state: RunnerState::NotLoaded,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    fn emit(&self, event: RunEvent<'_>) {
        if let Some(ref callback) = self.progress {
            callback(&event);
        }
    }

    /// Load, generate every prompt in order, release
    ///
    /// Returns `Err` only when the model could not be loaded. Item failures are
    /// counted in the summary, and so is a panic part-way through the prompts.
    pub fn run(
        &mut self,
        backend: &dyn SpeechBackend,
        prompts: &Prompts,
    ) -> Result<RunSummary, BackendError> {
        let descriptor = self.descriptor;
        let name = descriptor.name.as_str();
        let output_dir = descriptor.output_dir_name();
        let total = prompts.len();
        let started = Instant::now();

        self.store.sweep_partials(output_dir);
        let already_done = self.store.completed(output_dir, total);
        log::info!(
            "{}: starting ({} prompts, {} already generated)",
            name,
            total,
            already_done
        );

        let handle = match backend.load() {
            Ok(handle) => handle,
            Err(e) => {
                self.state = RunnerState::LoadFailed;
                log::error!("{}: {}", name, e.detailed());
                let summary = RunSummary {
                    backend: name.to_string(),
                    counts: RunCounts {
                        total,
                        ..RunCounts::default()
                    },
                    state: self.state,
                    failures: Vec::new(),
                    elapsed: started.elapsed(),
                    aborted: None,
                };
                self.emit(RunEvent::BackendFinished { summary: &summary });
                return Err(e);
            }
        };
        self.state = RunnerState::Loaded;
        log::info!("{}: model loaded in {:.1?}", name, started.elapsed());
        self.emit(RunEvent::BackendStarted {
            backend: name,
            total,
        });

        let mut guard = ReleaseGuard {
            backend: name,
            handle: Some(handle),
        };
        let mut counts = RunCounts {
            total,
            ..RunCounts::default()
        };
        let mut failures = Vec::new();
        let mut executor =
            ItemExecutor::new(self.store, name, output_dir, descriptor.sample_rate);

        let looped = catch_unwind(AssertUnwindSafe(|| {
            let Some(model) = guard.handle.as_deref_mut() else {
                return;
            };
            for (index, text) in prompts.iter() {
                let outcome = executor.execute(model, index, text);
                counts.record(&outcome);
                if let ItemOutcome::Failed { ref error } = outcome {
                    failures.push(ItemFailure {
                        index,
                        reason: error.detailed(),
                    });
                }
                self.emit(RunEvent::ItemFinished {
                    backend: name,
                    index,
                    total,
                    outcome: &outcome,
                });

                let done = index + 1;
                if done % self.progress_interval == 0 && done < total {
                    log::info!(
                        "{}: {}/{} (generated {}, skipped {}, failed {})",
                        name,
                        done,
                        total,
                        counts.generated,
                        counts.skipped,
                        counts.failed
                    );
                }
            }
        }));
        let aborted = looped.err().map(|payload| {
            let reached = counts.generated + counts.skipped + counts.failed;
            let reason = BackendError::panicked(name, payload.as_ref()).detailed();
            log::error!("{}: crashed at prompt {}: {}", name, reached, reason);
            reason
        });

        self.state = RunnerState::Draining;
        guard.release();
        self.state = RunnerState::Released;

        let summary = RunSummary {
            backend: name.to_string(),
            counts,
            state: self.state,
            failures,
            elapsed: started.elapsed(),
            aborted,
        };
        log::info!(
            "{}: {} in {:.1?}: generated {}, skipped {}, failed {}/{}",
            name,
            if summary.aborted.is_some() { "aborted" } else { "finished" },
            summary.elapsed,
            counts.generated,
            counts.skipped,
            counts.failed,
            counts.total
        );
        self.emit(RunEvent::BackendFinished { summary: &summary });
        Ok(summary)
    }
}
