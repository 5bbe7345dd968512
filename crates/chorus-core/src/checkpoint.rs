//! Filesystem checkpoint store
//!
//! There is no index file: a (backend, prompt index) pair is complete exactly
//! when `{root}/{backend}/sample_{index}.wav` exists. Commits write to a hidden
//! temp file in the same directory and rename it into place, so the
//! existence check never sees a half-written file.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::audio::{into_io_error, write_wav, AudioBuffer};
use crate::config::WavEncoding;
use crate::error::{BackendError, Result};

/// Prefix of in-flight temp files; never matches a completed output name
const PARTIAL_PREFIX: &str = ".partial-";

/// Record of completed generations, backed by the output tree itself
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    encoding: WavEncoding,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, encoding: WavEncoding) -> Self {
        Self {
            root: root.into(),
            encoding,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one backend's outputs
    pub fn backend_dir(&self, backend: &str) -> PathBuf {
        self.root.join(backend)
    }

    /// Canonical output path for a prompt (pure function of backend and index)
    pub fn path_for(&self, backend: &str, index: usize) -> PathBuf {
        self.backend_dir(backend).join(format!("sample_{}.wav", index))
    }

    /// Whether this prompt already has a completed output
    pub fn exists(&self, backend: &str, index: usize) -> bool {
        self.path_for(backend, index).is_file()
    }

    /// Persist generated audio at the canonical path
    ///
    /// Written to a temp file next to the target and renamed over it, so a
    /// crash mid-write leaves no file at the canonical path.
    pub fn commit(&self, backend: &str, index: usize, audio: &AudioBuffer) -> Result<PathBuf> {
        let dir = self.backend_dir(backend);
        let path = self.path_for(backend, index);
        let persist_err = |source: std::io::Error| BackendError::PersistFailure {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(persist_err)?;

        let mut temp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(".wav")
            .tempfile_in(&dir)
            .map_err(persist_err)?;

        write_wav(BufWriter::new(temp.as_file_mut()), audio, self.encoding)
            .map_err(|e| persist_err(into_io_error(e)))?;
        temp.as_file().sync_all().map_err(persist_err)?;

        temp.persist(&path).map_err(|e| persist_err(e.error))?;
        log::debug!("checkpoint: committed {:?}", path);
        Ok(path)
    }

    /// Remove temp files left behind by a killed run
    ///
    /// Returns the number of files removed.
    pub fn sweep_partials(&self, backend: &str) -> usize {
        let dir = self.backend_dir(backend);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let is_partial = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(PARTIAL_PREFIX));
            if !is_partial {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!(
                    "checkpoint: Failed to remove partial file {:?}: {}",
                    entry.path(),
                    e
                ),
            }
        }

        if removed > 0 {
            log::info!(
                "checkpoint: {}: removed {} partial files from an interrupted run",
                backend,
                removed
            );
        }
        removed
    }

    /// Count completed outputs among the first `total` prompts
    pub fn completed(&self, backend: &str, total: usize) -> usize {
        (0..total).filter(|&i| self.exists(backend, i)).count()
    }
}
