//! Scripted in-memory backend for runner and orchestrator tests

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::{ModelHandle, SpeechBackend};
use crate::audio::AudioBuffer;
use crate::error::{BackendError, Result};

/// Calls observed across every handle of one mock backend
#[derive(Debug, Default)]
pub(crate) struct CallLog {
    pub loads: usize,
    pub generated: Vec<String>,
    pub releases: usize,
}

#[derive(Clone)]
pub(crate) struct MockBackend {
    name: String,
    sample_rate: u32,
    fail_load: bool,
    fail_on: HashSet<String>,
    panic_on: Option<String>,
    log: Arc<Mutex<CallLog>>,
}

impl MockBackend {
    pub fn new(name: &str, sample_rate: u32) -> Self {
        Self {
            name: name.to_string(),
            sample_rate,
            fail_load: false,
            fail_on: HashSet::new(),
            panic_on: None,
            log: Arc::new(Mutex::new(CallLog::default())),
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on.insert(text.to_string());
        self
    }

    pub fn panicking_on(mut self, text: &str) -> Self {
        self.panic_on = Some(text.to_string());
        self
    }

    pub fn loads(&self) -> usize {
        self.log.lock().unwrap().loads
    }

    pub fn releases(&self) -> usize {
        self.log.lock().unwrap().releases
    }

    pub fn generated(&self) -> Vec<String> {
        self.log.lock().unwrap().generated.clone()
    }
}

impl SpeechBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Box<dyn ModelHandle>> {
        self.log.lock().unwrap().loads += 1;
        if self.fail_load {
            return Err(BackendError::load(&self.name, "weights unavailable"));
        }
        Ok(Box::new(MockHandle {
            backend: self.clone(),
        }))
    }
}

struct MockHandle {
    backend: MockBackend,
}

impl ModelHandle for MockHandle {
    fn generate(&mut self, text: &str) -> Result<AudioBuffer> {
        self.backend
            .log
            .lock()
            .unwrap()
            .generated
            .push(text.to_string());

        if self.backend.panic_on.as_deref() == Some(text) {
            panic!("{}: device lost while generating {:?}", self.backend.name, text);
        }
        if self.backend.fail_on.contains(text) {
            return Err(BackendError::GenerationFailure(format!(
                "cannot synthesise {:?}",
                text
            )));
        }

        // Length depends on the text so outputs differ between prompts
        let frames = self.backend.sample_rate as usize / 100 * (1 + text.len() % 7);
        Ok(AudioBuffer::mono(vec![0.25; frames], self.backend.sample_rate))
    }

    fn release(self: Box<Self>) {
        self.backend.log.lock().unwrap().releases += 1;
    }
}
