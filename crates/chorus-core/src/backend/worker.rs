//! Long-lived model worker engine
//!
//! The worker is a separate program (typically a Python script in the
//! engine's own environment) that loads the model once and then answers one
//! JSON object per line on stdin with one JSON object per line on stdout:
//!
//! ```text
//! -> {"op":"load","params":{...},"reference_clip":"ref.wav","sample_rate":24000}
//! <- {"ok":true,"sample_rate":24000}
//! -> {"op":"generate","text":"Hello world.","output":"/tmp/chorus-worker-x/item_0.wav"}
//! <- {"ok":true}
//! -> {"op":"shutdown"}
//! ```
//!
//! Audio travels through a WAV file in a scratch directory rather than over the
//! pipe. Stdout lines that don't parse as a reply (library chatter, progress
//! dicts) are logged at debug level and skipped; only EOF or a read error ends
//! the conversation.
//! Stderr is inherited so the worker's own logs stay visible.
//!
//! The running process is the model handle: releasing it shuts the process
//! down, which is what frees its GPU memory.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use super::{non_empty, require_reference_clip, resolve_program, ModelHandle, SpeechBackend};
use crate::audio::{read_wav, AudioBuffer};
use crate::error::{BackendError, Result};

/// How long a worker gets to exit after `shutdown` before it is killed
const RELEASE_GRACE: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum WorkerRequest<'a> {
    Load {
        params: &'a BTreeMap<String, serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference_clip: Option<&'a Path>,
        sample_rate: u32,
    },
    Generate {
        text: &'a str,
        output: &'a Path,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
}

/// Backend driven by a persistent worker process
pub struct WorkerBackend {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    params: BTreeMap<String, serde_json::Value>,
    reference_clip: Option<PathBuf>,
    sample_rate: u32,
}

impl WorkerBackend {
    pub fn new(
        name: &str,
        program: PathBuf,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        params: BTreeMap<String, serde_json::Value>,
        reference_clip: Option<PathBuf>,
        sample_rate: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            program,
            args,
            env,
            params,
            reference_clip,
            sample_rate,
        }
    }
}

impl SpeechBackend for WorkerBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Box<dyn ModelHandle>> {
        require_reference_clip(&self.name, self.reference_clip.as_deref())?;
        let program = resolve_program(&self.name, &self.program)?;

        let scratch = tempfile::Builder::new()
            .prefix("chorus-worker-")
            .tempdir()
            .map_err(|e| BackendError::load(&self.name, format!("scratch dir: {}", e)))?;

        log::info!(
            "{}: starting model worker {:?} {:?}",
            self.name,
            program,
            self.args
        );
        let mut child = Command::new(&program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                BackendError::load(&self.name, format!("failed to spawn worker: {}", e))
            })?;

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(stdout) => BufReader::new(stdout),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BackendError::load(&self.name, "worker stdout unavailable"));
            }
        };

        // From here on, dropping the handle reaps the process
        let mut handle = WorkerHandle {
            backend: self.name.clone(),
            child: Some(child),
            stdin,
            stdout,
            scratch,
            next_item: 0,
            broken: None,
        };

        let reply = handle
            .request(&WorkerRequest::Load {
                params: &self.params,
                reference_clip: self.reference_clip.as_deref(),
                sample_rate: self.sample_rate,
            })
            .map_err(|reason| BackendError::load(&self.name, reason))?;

        if !reply.ok {
            let reason = reply
                .error
                .unwrap_or_else(|| String::from("worker refused to load"));
            handle.shutdown();
            return Err(BackendError::load(&self.name, reason));
        }

        if let Some(rate) = reply.sample_rate.filter(|&r| r != self.sample_rate) {
            log::warn!(
                "{}: worker reports {} Hz, configured native rate is {} Hz",
                self.name,
                rate,
                self.sample_rate
            );
        }

        log::info!("{}: model loaded", self.name);
        Ok(Box::new(handle))
    }
}

struct WorkerHandle {
    backend: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    scratch: TempDir,
    next_item: usize,
    /// Set once the pipe breaks; every later request fails fast
    broken: Option<String>,
}

impl WorkerHandle {
    fn send(&mut self, request: &WorkerRequest<'_>) -> std::result::Result<(), String> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| String::from("worker stdin is closed"))?;
        let line = serde_json::to_string(request).map_err(|e| e.to_string())?;
        writeln!(stdin, "{}", line)
            .and_then(|_| stdin.flush())
            .map_err(|e| format!("failed to send request to worker: {}", e))
    }

    fn request(&mut self, request: &WorkerRequest<'_>) -> std::result::Result<WorkerReply, String> {
        self.send(request)?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| format!("failed to read worker reply: {}", e))?;
            if read == 0 {
                return Err(String::from("worker exited unexpectedly"));
            }

            let trimmed = line.trim();
            if trimmed.starts_with('{') {
                if let Ok(reply) = serde_json::from_str::<WorkerReply>(trimmed) {
                    return Ok(reply);
                }
            }
            if !trimmed.is_empty() {
                log::debug!("{}: worker: {}", self.backend, trimmed);
            }
        }
    }

    /// Ask the worker to exit, then reap it (killing it after the grace period)
    fn shutdown(&mut self) {
        if self.stdin.is_some() && self.broken.is_none() {
            if let Err(e) = self.send(&WorkerRequest::Shutdown) {
                log::debug!("{}: {}", self.backend, e);
            }
        }
        // Closing stdin is the fallback shutdown signal
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return;
        };

        let deadline = Instant::now() + RELEASE_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("{}: worker exited ({})", self.backend, status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Ok(None) => {
                    log::warn!(
                        "{}: worker still running after {:?}, killing it",
                        self.backend,
                        RELEASE_GRACE
                    );
                    break;
                }
                Err(e) => {
                    log::warn!("{}: failed to poll worker: {}", self.backend, e);
                    break;
                }
            }
        }
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl ModelHandle for WorkerHandle {
    fn generate(&mut self, text: &str) -> Result<AudioBuffer> {
        if let Some(reason) = &self.broken {
            return Err(BackendError::GenerationFailure(format!(
                "worker unavailable: {}",
                reason
            )));
        }

        let output = self
            .scratch
            .path()
            .join(format!("item_{}.wav", self.next_item));
        self.next_item += 1;

        let reply = match self.request(&WorkerRequest::Generate {
            text,
            output: &output,
        }) {
            Ok(reply) => reply,
            Err(reason) => {
                self.broken = Some(reason.clone());
                return Err(BackendError::GenerationFailure(reason));
            }
        };

        let audio = if reply.ok {
            read_wav(&output).map_err(|e| {
                BackendError::GenerationFailure(format!("unreadable worker output: {}", e))
            })
        } else {
            Err(BackendError::GenerationFailure(
                reply
                    .error
                    .unwrap_or_else(|| String::from("worker reported failure")),
            ))
        };
        let _ = fs::remove_file(&output);

        non_empty(audio?)
    }

    fn release(mut self: Box<Self>) {
        log::info!("{}: releasing model worker", self.backend);
        self.shutdown();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
