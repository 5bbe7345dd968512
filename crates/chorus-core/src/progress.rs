//! Progress events emitted while a backend runs

use std::sync::Arc;

use crate::executor::ItemOutcome;
use crate::runner::RunSummary;

/// Progress of one backend run
#[derive(Debug)]
pub enum RunEvent<'a> {
    /// Model loaded, about to walk the prompt list
    BackendStarted { backend: &'a str, total: usize },
    /// One prompt done (generated, skipped or failed)
    ItemFinished {
        backend: &'a str,
        index: usize,
        total: usize,
        outcome: &'a ItemOutcome,
    },
    /// Model released (also sent after a load failure)
    BackendFinished { summary: &'a RunSummary },
}

/// Callback for run progress (uses Arc for cloneability)
pub type ProgressCallback = Arc<dyn Fn(&RunEvent<'_>) + Send + Sync>;
