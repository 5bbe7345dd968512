//! Error types for prompt loading, configuration and backend execution

use std::any::Any;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a backend, from a single item up to a whole isolated process
///
/// Item-level variants (`GenerationFailure`, `PersistFailure`) never escape the
/// per-item executor. Everything else is fatal for one backend and is caught
/// by the orchestrator before the next backend runs.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend}: required resource not found: {path}")]
    MissingResource { backend: String, path: PathBuf },

    #[error("{backend}: failed to load model: {reason}")]
    LoadFailure { backend: String, reason: String },

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Failed to write output file: {path}")]
    PersistFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{backend}: isolated process failed: {reason}")]
    BackendProcessFailure { backend: String, reason: String },

    #[error("{backend}: backend crashed: {message}")]
    Panicked { backend: String, message: String },
}

impl BackendError {
    /// Whether this error only concerns one prompt (the batch continues)
    pub fn is_item_level(&self) -> bool {
        matches!(self, Self::GenerationFailure(_) | Self::PersistFailure { .. })
    }

    /// Message including the underlying cause chain
    pub fn detailed(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }

    pub(crate) fn load(backend: &str, reason: impl Into<String>) -> Self {
        Self::LoadFailure {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    /// Wraps a caught panic payload
    pub(crate) fn panicked(backend: &str, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            String::from("unknown panic")
        };
        Self::Panicked {
            backend: backend.to_string(),
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors while reading the prompt table
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Prompt file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read prompt file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Prompt file has no columns: {0}")]
    NoColumns(PathBuf),
}

/// Errors while loading or saving the YAML configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write config file: {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
