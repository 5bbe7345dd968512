//! Batch orchestrator
//!
//! Runs every configured backend, strictly one after another, over the same
//! prompt source. Whatever happens to one backend (load failure, isolated
//! process failure, panic) is logged and recorded in the [`BatchReport`], and
//! the next backend still runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::bridge::{
    BackendExecution, ExecutionOutcome, InProcessExecution, IsolatedExecution, PromptSource,
};
use crate::config::{BackendDescriptor, Config};
use crate::error::BackendError;
use crate::runner::{ItemFailure, RunCounts};

/// Final state of one backend in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackendStatus {
    /// Ran to the end (individual prompts may still have failed)
    Completed,
    /// Backend-level failure; no further work was attempted for it
    Failed { reason: String },
    /// Switched off in the configuration
    Disabled,
}

/// Outcome of one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendReport {
    pub backend: String,
    pub isolated: bool,
    pub status: BackendStatus,
    /// `None` for isolated backends, whose counts stay in the child process
    pub counts: Option<RunCounts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_items: Vec<ItemFailure>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub prompt_count: usize,
    pub output_root: PathBuf,
    pub backends: Vec<BackendReport>,
}

impl BatchReport {
    pub fn get(&self, backend: &str) -> Option<&BackendReport> {
        self.backends.iter().find(|r| r.backend == backend)
    }

    /// Backends that failed as a whole
    pub fn failed_backends(&self) -> impl Iterator<Item = &BackendReport> {
        self.backends
            .iter()
            .filter(|r| matches!(r.status, BackendStatus::Failed { .. }))
    }
}

/// Sequences backend runs for one batch
pub struct BatchOrchestrator<'a> {
    config: &'a Config,
    in_process: Box<dyn BackendExecution + 'a>,
    isolated: Box<dyn BackendExecution + 'a>,
    selection: Vec<String>,
}

impl<'a> BatchOrchestrator<'a> {
    /// `config_path` is forwarded to isolated processes
    pub fn new(config: &'a Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            in_process: Box::new(InProcessExecution::new(config)),
            isolated: Box::new(IsolatedExecution::new(config_path)),
            selection: Vec::new(),
        }
    }

    pub fn with_in_process(mut self, execution: impl BackendExecution + 'a) -> Self {
        self.in_process = Box::new(execution);
        self
    }

    pub fn with_isolated(mut self, execution: impl BackendExecution + 'a) -> Self {
        self.isolated = Box::new(execution);
        self
    }

    /// Only run the named backends (all when empty), still in configured order
    pub fn with_selection(mut self, names: Vec<String>) -> Self {
        self.selection = names;
        self
    }

    fn selected(&self, descriptor: &BackendDescriptor) -> bool {
        self.selection.is_empty() || self.selection.iter().any(|n| *n == descriptor.name)
    }

    /// Run every selected backend in order
    pub fn run(&self, source: &PromptSource) -> BatchReport {
        let started_at = Local::now();
        let output_root = &self.config.output_root;
        log::info!(
            "Batch started: {} prompts, {} backends, output {:?}",
            source.prompts.len(),
            self.config.backends.len(),
            output_root
        );

        let mut reports = Vec::new();
        for descriptor in self.config.backends.iter().filter(|d| self.selected(d)) {
            reports.push(self.run_backend(descriptor, source));
        }

        for report in &reports {
            match (&report.status, report.counts) {
                (BackendStatus::Completed, Some(c)) => log::info!(
                    "  {}: generated {}, skipped {}, failed {}/{}",
                    report.backend,
                    c.generated,
                    c.skipped,
                    c.failed,
                    c.total
                ),
                (BackendStatus::Completed, None) => {
                    log::info!("  {}: completed (isolated)", report.backend)
                }
                (BackendStatus::Failed { reason }, _) => {
                    log::warn!("  {}: FAILED: {}", report.backend, reason)
                }
                (BackendStatus::Disabled, _) => log::info!("  {}: disabled", report.backend),
            }
        }

        BatchReport {
            started_at,
            finished_at: Local::now(),
            prompt_count: source.prompts.len(),
            output_root: output_root.clone(),
            backends: reports,
        }
    }

    fn run_backend(&self, descriptor: &BackendDescriptor, source: &PromptSource) -> BackendReport {
        let isolated = descriptor.is_isolated();
        let mut report = BackendReport {
            backend: descriptor.name.clone(),
            isolated,
            status: BackendStatus::Completed,
            counts: None,
            failed_items: Vec::new(),
        };

        if !descriptor.enabled {
            log::info!("{}: disabled, skipping", descriptor.name);
            report.status = BackendStatus::Disabled;
            return report;
        }

        let execution = if isolated {
            &self.isolated
        } else {
            &self.in_process
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            execution.run(descriptor, source, &self.config.output_root)
        }))
        .unwrap_or_else(|payload| Err(BackendError::panicked(&descriptor.name, payload.as_ref())));

        match result {
            Ok(ExecutionOutcome::Completed(summary)) => {
                report.counts = Some(summary.counts);
                report.failed_items = summary.failures;
                if let Some(reason) = summary.aborted {
                    log::error!(
                        "{}: backend failed, continuing with next: {}",
                        descriptor.name,
                        reason
                    );
                    report.status = BackendStatus::Failed { reason };
                }
            }
            Ok(ExecutionOutcome::Exited { .. }) => {}
            Err(e) => {
                log::error!(
                    "{}: backend failed, continuing with next: {}",
                    descriptor.name,
                    e.detailed()
                );
                if !isolated {
                    report.counts = Some(RunCounts {
                        total: source.prompts.len(),
                        ..RunCounts::default()
                    });
                }
                report.status = BackendStatus::Failed {
                    reason: e.detailed(),
                };
            }
        }
        report
    }
}
