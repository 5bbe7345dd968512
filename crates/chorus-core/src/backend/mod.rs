//! Backend adapters
//!
//! Every TTS engine sits behind the same three operations:
//!
//! ```text
//!   SpeechBackend::load()        -> Box<dyn ModelHandle>   (may download weights, allocate GPU)
//!   ModelHandle::generate(text)  -> AudioBuffer            (one prompt in, one buffer out)
//!   ModelHandle::release(self)                             (frees the model; consumes the handle)
//! ```
//!
//! `release` takes the handle by value, so a handle can only be released once
//! and can't be used afterwards.
//!
//! ## Available Engines
//!
//! - **WorkerBackend**: long-lived model process speaking JSON lines over stdio.
//!   Loads once, keeps the model resident, exits on release.
//! - **CommandBackend**: one-shot synthesiser CLI run once per prompt.

mod command;
#[cfg(test)]
pub(crate) mod mock;
mod worker;

use std::path::Path;

use crate::audio::AudioBuffer;
use crate::config::{BackendDescriptor, EngineSpec};
use crate::error::{BackendError, Result};

pub use command::CommandBackend;
pub use worker::WorkerBackend;

/// A loadable TTS engine
///
/// Implementations hold only configuration. All model state lives in the
/// handle returned by [`SpeechBackend::load`].
pub trait SpeechBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Load the model
    ///
    /// Fails with `MissingResource` when a required auxiliary file is absent
    /// and `LoadFailure` when the model can't be initialised.
    fn load(&self) -> Result<Box<dyn ModelHandle>>;
}

/// A loaded model, exclusively owned by one backend run
pub trait ModelHandle: Send {
    /// Synthesise one prompt
    ///
    /// Errors are item-level (`GenerationFailure`); the handle stays usable.
    fn generate(&mut self, text: &str) -> Result<AudioBuffer>;

    /// Free the model and any accelerator memory it holds
    fn release(self: Box<Self>);
}

/// Build the adapter for a configured backend
pub fn create_backend(descriptor: &BackendDescriptor) -> Box<dyn SpeechBackend> {
    match &descriptor.engine {
        EngineSpec::Worker {
            program,
            args,
            env,
            params,
        } => Box::new(WorkerBackend::new(
            &descriptor.name,
            program.clone(),
            args.clone(),
            env.clone(),
            params.clone(),
            descriptor.reference_clip.clone(),
            descriptor.sample_rate,
        )),
        EngineSpec::Command { program, args } => Box::new(CommandBackend::new(
            &descriptor.name,
            program.clone(),
            args.clone(),
            descriptor.reference_clip.clone(),
            descriptor.sample_rate,
        )),
    }
}

/// Fail with `MissingResource` if a configured reference clip is absent
pub(crate) fn require_reference_clip(backend: &str, clip: Option<&Path>) -> Result<()> {
    match clip {
        Some(path) if !path.is_file() => {
            log::error!("{}: reference clip not found: {:?}", backend, path);
            Err(BackendError::MissingResource {
                backend: backend.to_string(),
                path: path.to_path_buf(),
            })
        }
        _ => Ok(()),
    }
}

/// Resolve an engine executable (absolute, relative, or on PATH)
pub(crate) fn resolve_program(backend: &str, program: &Path) -> Result<std::path::PathBuf> {
    which::which(program).map_err(|e| {
        BackendError::load(backend, format!("executable {:?} not found: {}", program, e))
    })
}

/// Reject empty output from an engine
pub(crate) fn non_empty(audio: AudioBuffer) -> Result<AudioBuffer> {
    if audio.is_empty() {
        return Err(BackendError::GenerationFailure(String::from(
            "engine produced no audio",
        )));
    }
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Isolation};
    use std::path::PathBuf;

    #[test]
    fn test_missing_reference_clip() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ref_clip.wav");
        let err = require_reference_clip("chatterbox", Some(&missing)).unwrap_err();
        assert!(matches!(err, BackendError::MissingResource { ref path, .. } if *path == missing));

        std::fs::write(&missing, b"RIFF").unwrap();
        assert!(require_reference_clip("chatterbox", Some(&missing)).is_ok());
        assert!(require_reference_clip("qwen3", None).is_ok());
    }

    #[test]
    fn test_create_backend_keeps_name() {
        let config = Config::default();
        for descriptor in &config.backends {
            assert_eq!(create_backend(descriptor).name(), descriptor.name);
        }

        let piper = BackendDescriptor {
            name: String::from("piper"),
            output_subdir: None,
            sample_rate: 22_050,
            enabled: true,
            reference_clip: None,
            engine: EngineSpec::Command {
                program: PathBuf::from("piper"),
                args: vec![],
            },
            isolation: Isolation::InProcess,
        };
        assert_eq!(create_backend(&piper).name(), "piper");
    }

    #[test]
    fn test_unresolvable_program_is_load_failure() {
        let err = resolve_program("qwen3", Path::new("/definitely/not/a/python")).unwrap_err();
        assert!(matches!(err, BackendError::LoadFailure { .. }));
    }

    #[test]
    fn test_empty_audio_is_generation_failure() {
        let err = non_empty(AudioBuffer::mono(vec![], 24_000)).unwrap_err();
        assert!(err.is_item_level());
    }
}
