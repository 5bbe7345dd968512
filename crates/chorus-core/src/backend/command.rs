//! One-shot synthesiser command engine
//!
//! For engines that ship as a CLI writing a WAV file (piper, espeak-ng,
//! a wrapper script). Each prompt runs the command once:
//!
//! ```text
//! piper --model en_US-amy --output_file {output}      (prompt on stdin)
//! espeak-ng -w {output} {text}
//! ```
//!
//! Loading only resolves the executable and creates a scratch directory, so
//! there is nothing resident between prompts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

use super::{non_empty, require_reference_clip, resolve_program, ModelHandle, SpeechBackend};
use crate::audio::{read_wav, AudioBuffer};
use crate::error::{BackendError, Result};

/// Backend driven by a CLI invoked once per prompt
pub struct CommandBackend {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    reference_clip: Option<PathBuf>,
    sample_rate: u32,
}

impl CommandBackend {
    pub fn new(
        name: &str,
        program: PathBuf,
        args: Vec<String>,
        reference_clip: Option<PathBuf>,
        sample_rate: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            program,
            args,
            reference_clip,
            sample_rate,
        }
    }
}

impl SpeechBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Box<dyn ModelHandle>> {
        require_reference_clip(&self.name, self.reference_clip.as_deref())?;
        let program = resolve_program(&self.name, &self.program)?;

        let scratch = tempfile::Builder::new()
            .prefix("chorus-cmd-")
            .tempdir()
            .map_err(|e| BackendError::load(&self.name, format!("scratch dir: {}", e)))?;

        log::info!("{}: using synthesiser {:?}", self.name, program);
        Ok(Box::new(CommandHandle {
            backend: self.name.clone(),
            program,
            args: self.args.clone(),
            reference_clip: self.reference_clip.clone(),
            sample_rate: self.sample_rate,
            scratch,
            next_item: 0,
        }))
    }
}

struct CommandHandle {
    backend: String,
    program: PathBuf,
    args: Vec<String>,
    reference_clip: Option<PathBuf>,
    sample_rate: u32,
    scratch: TempDir,
    next_item: usize,
}

impl CommandHandle {
    fn expand(&self, arg: &str, text: &str, output: &Path) -> String {
        let clip = self
            .reference_clip
            .as_deref()
            .map(|p| p.to_string_lossy())
            .unwrap_or_default();
        arg.replace("{output}", &output.to_string_lossy())
            .replace("{reference_clip}", &clip)
            .replace("{sample_rate}", &self.sample_rate.to_string())
            // Last, so placeholders inside the prompt text stay literal
            .replace("{text}", text)
    }
}

impl ModelHandle for CommandHandle {
    fn generate(&mut self, text: &str) -> Result<AudioBuffer> {
        let output = self
            .scratch
            .path()
            .join(format!("item_{}.wav", self.next_item));
        self.next_item += 1;

        let text_on_stdin = !self.args.iter().any(|a| a.contains("{text}"));
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| self.expand(a, text, &output))
            .collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if text_on_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BackendError::GenerationFailure(format!("failed to run {:?}: {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A synthesiser that exits early closes the pipe; its exit status says why
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                log::debug!("{}: writing prompt to stdin: {}", self.backend, e);
            }
        }

        let result = child.wait_with_output().map_err(|e| {
            BackendError::GenerationFailure(format!("failed to wait for {:?}: {}", self.program, e))
        })?;

        if !result.status.success() {
            let _ = fs::remove_file(&output);
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BackendError::GenerationFailure(format!(
                "{:?} exited with {}: {}",
                self.program,
                result.status,
                stderr_tail(&stderr)
            )));
        }

        let audio = read_wav(&output).map_err(|e| {
            BackendError::GenerationFailure(format!("no readable output from synthesiser: {}", e))
        });
        let _ = fs::remove_file(&output);
        non_empty(audio?)
    }

    fn release(self: Box<Self>) {
        log::info!("{}: releasing synthesiser", self.backend);
        if let Err(e) = self.scratch.close() {
            log::warn!("{}: failed to remove scratch dir: {}", self.backend, e);
        }
    }
}

/// Last few lines of a synthesiser's stderr
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    lines[lines.len().saturating_sub(5)..].join(" | ")
}
