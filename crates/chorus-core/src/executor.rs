//! Per-item executor
//!
//! One prompt through one loaded model: checkpoint lookup, generate, commit.
//! Every failure ends here as [`ItemOutcome::Failed`]; nothing propagates, so
//! the runner's loop always moves on to the next prompt.

use std::path::PathBuf;

use crate::audio::AudioBuffer;
use crate::backend::ModelHandle;
use crate::checkpoint::CheckpointStore;
use crate::error::BackendError;

/// Result of one (backend, prompt) pair
#[derive(Debug)]
pub enum ItemOutcome {
    /// Model ran and the output was committed
    Generated { path: PathBuf },
    /// Output already existed; the model was not called
    Skipped { path: PathBuf },
    /// Generation or persistence failed for this prompt only
    Failed { error: BackendError },
}

/// Drives single prompts for one backend
pub struct ItemExecutor<'a> {
    store: &'a CheckpointStore,
    backend: &'a str,
    output_dir: &'a str,
    native_rate: u32,
    rate_warned: bool,
}

impl<'a> ItemExecutor<'a> {
    /// `output_dir` is the backend's directory name under the store root
    pub fn new(
        store: &'a CheckpointStore,
        backend: &'a str,
        output_dir: &'a str,
        native_rate: u32,
    ) -> Self {
        Self {
            store,
            backend,
            output_dir,
            native_rate,
            rate_warned: false,
        }
    }

    /// Run one prompt, never failing
    pub fn execute(
        &mut self,
        model: &mut dyn ModelHandle,
        index: usize,
        text: &str,
    ) -> ItemOutcome {
        if self.store.exists(self.output_dir, index) {
            log::debug!("{}: prompt {} already generated, skipping", self.backend, index);
            return ItemOutcome::Skipped {
                path: self.store.path_for(self.output_dir, index),
            };
        }

        let result = model
            .generate(text)
            .and_then(|audio| self.commit(index, &audio));

        match result {
            Ok(path) => ItemOutcome::Generated { path },
            Err(error) => {
                log::error!(
                    "{}: prompt {} failed: {}",
                    self.backend,
                    index,
                    error.detailed()
                );
                ItemOutcome::Failed { error }
            }
        }
    }

    fn commit(&mut self, index: usize, audio: &AudioBuffer) -> Result<PathBuf, BackendError> {
        if audio.sample_rate != self.native_rate && !self.rate_warned {
            log::warn!(
                "{}: engine delivered {} Hz, configured for {} Hz; writing {} Hz",
                self.backend,
                audio.sample_rate,
                self.native_rate,
                audio.sample_rate
            );
            self.rate_warned = true;
        }
        let path = self.store.commit(self.output_dir, index, audio)?;
        log::debug!(
            "{}: prompt {} saved ({:.2}s of audio)",
            self.backend,
            index,
            audio.duration_secs()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::SpeechBackend;
    use crate::config::WavEncoding;

    #[test]
    fn test_generates_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), WavEncoding::Pcm16);
        let backend = MockBackend::new("qwen3", 24_000);
        let mut model = backend.load().unwrap();
        let mut executor = ItemExecutor::new(&store, "qwen3", "qwen3", 24_000);

        let outcome = executor.execute(model.as_mut(), 0, "Hello world.");
        match outcome {
            ItemOutcome::Generated { path } => {
                assert_eq!(path, store.path_for("qwen3", 0));
                let reader = hound::WavReader::open(path).unwrap();
                assert_eq!(reader.spec().sample_rate, 24_000);
            }
            other => panic!("expected Generated, got {:?}", other),
        }
        assert_eq!(backend.generated(), vec![String::from("Hello world.")]);
    }

    #[test]
    fn test_existing_output_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), WavEncoding::Pcm16);
        let backend = MockBackend::new("lux", 48_000);
        let mut model = backend.load().unwrap();

        store
            .commit("lux", 1, &AudioBuffer::mono(vec![0.1; 480], 48_000))
            .unwrap();
        let mut executor = ItemExecutor::new(&store, "lux", "lux", 48_000);

        let outcome = executor.execute(model.as_mut(), 1, "This is a test.");
        assert!(matches!(outcome, ItemOutcome::Skipped { .. }));
        assert!(backend.generated().is_empty());
    }

    #[test]
    fn test_generation_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), WavEncoding::Pcm16);
        let backend = MockBackend::new("qwen3", 24_000).failing_on("bad prompt");
        let mut model = backend.load().unwrap();
        let mut executor = ItemExecutor::new(&store, "qwen3", "qwen3", 24_000);

        let outcome = executor.execute(model.as_mut(), 4, "bad prompt");
        assert!(matches!(
            outcome,
            ItemOutcome::Failed {
                error: BackendError::GenerationFailure(_)
            }
        ));
        assert!(!store.exists("qwen3", 4));

        // The handle is still usable afterwards
        let outcome = executor.execute(model.as_mut(), 5, "good prompt");
        assert!(matches!(outcome, ItemOutcome::Generated { .. }));
    }

    #[test]
    fn test_persist_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = CheckpointStore::new(&blocker, WavEncoding::Pcm16);
        let backend = MockBackend::new("pocket", 24_000);
        let mut model = backend.load().unwrap();
        let mut executor = ItemExecutor::new(&store, "pocket", "pocket", 24_000);

        let outcome = executor.execute(model.as_mut(), 0, "Hello world.");
        assert!(matches!(
            outcome,
            ItemOutcome::Failed {
                error: BackendError::PersistFailure { .. }
            }
        ));
    }

    #[test]
    fn test_output_dir_differs_from_backend_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), WavEncoding::Pcm16);
        let backend = MockBackend::new("chatterbox", 24_000);
        let mut model = backend.load().unwrap();
        let mut executor = ItemExecutor::new(&store, "chatterbox", "cb_v2", 24_000);

        executor.execute(model.as_mut(), 0, "Hello world.");
        assert!(store.exists("cb_v2", 0));
        assert!(!store.exists("chatterbox", 0));
    }
}
