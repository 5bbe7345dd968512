//! Configuration for a generation run
//!
//! Configuration is stored as YAML. It is loaded once at startup and passed by
//! reference into the orchestrator, runners and adapters.
//! Default location: `./chorus.yaml`, falling back to `~/.config/chorus/config.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// File name looked up in the working directory before the user config dir
pub const LOCAL_CONFIG_FILE: &str = "chorus.yaml";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the prompt table lives and how much of it to use
    pub prompts: PromptConfig,
    /// Root of the output tree (`{output_root}/{backend}/sample_{index}.wav`)
    pub output_root: PathBuf,
    /// Output audio settings
    pub audio: AudioConfig,
    /// Log a progress line every N prompts
    pub progress_interval: usize,
    /// Backends, run in this order
    pub backends: Vec<BackendDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prompts: PromptConfig::default(),
            output_root: PathBuf::from("generated_dataset"),
            audio: AudioConfig::default(),
            progress_interval: 25,
            backends: default_backends(),
        }
    }
}

impl Config {
    /// Validate and normalise values
    ///
    /// Clamps numeric settings into range. Backend names and output directories
    /// must be unique and usable as a single path component.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.prompts.max_prompts = self.prompts.max_prompts.max(1);
        self.progress_interval = self.progress_interval.max(1);

        let mut names = HashSet::new();
        let mut dirs = HashSet::new();
        for backend in &self.backends {
            if !is_path_component(&backend.name) {
                return Err(ConfigError::Invalid(format!(
                    "backend name {:?} must be a plain directory name",
                    backend.name
                )));
            }
            if !is_path_component(backend.output_dir_name()) {
                return Err(ConfigError::Invalid(format!(
                    "output_subdir {:?} of backend {} must be a plain directory name",
                    backend.output_dir_name(),
                    backend.name
                )));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "backend {} is configured twice",
                    backend.name
                )));
            }
            if !dirs.insert(backend.output_dir_name()) {
                return Err(ConfigError::Invalid(format!(
                    "backend {} shares output directory {:?} with another backend",
                    backend.name,
                    backend.output_dir_name()
                )));
            }
            if backend.sample_rate == 0 {
                return Err(ConfigError::Invalid(format!(
                    "backend {} has a sample rate of 0",
                    backend.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a backend by name
    pub fn backend(&self, name: &str) -> Option<&BackendDescriptor> {
        self.backends.iter().find(|b| b.name == name)
    }
}

fn is_path_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

/// Prompt table settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// CSV file with one prompt per row
    pub path: PathBuf,
    /// Column holding the prompt text (falls back to the first column)
    pub text_column: String,
    /// Only the first N rows are used
    pub max_prompts: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("prompts.csv"),
            text_column: String::from("text"),
            max_prompts: 500,
        }
    }
}

/// Output audio settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample encoding of written WAV files
    pub encoding: WavEncoding,
}

/// Sample encoding for output WAV files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WavEncoding {
    /// 16-bit signed PCM
    #[default]
    Pcm16,
    /// 32-bit IEEE float
    Float32,
}

/// One TTS engine, configured once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend name, used in logs and as the default output directory
    pub name: String,
    /// Output directory under `output_root` (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_subdir: Option<String>,
    /// Native sample rate of the model
    pub sample_rate: u32,
    /// Disabled backends are reported but not run
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Reference voice clip (voice cloning backends); must exist at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_clip: Option<PathBuf>,
    /// How the model is driven
    pub engine: EngineSpec,
    /// Where the backend runs
    #[serde(default)]
    pub isolation: Isolation,
}

fn default_enabled() -> bool {
    true
}

impl BackendDescriptor {
    /// Directory name under the output root
    pub fn output_dir_name(&self) -> &str {
        self.output_subdir.as_deref().unwrap_or(&self.name)
    }

    /// Whether this backend runs in a separate OS process
    pub fn is_isolated(&self) -> bool {
        matches!(self.isolation, Isolation::Subprocess { .. })
    }
}

/// How a backend's model is driven
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineSpec {
    /// Long-lived worker process that keeps the model resident and answers
    /// JSON-line requests on stdin/stdout
    Worker {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        /// Passed verbatim to the worker's load request
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, serde_json::Value>,
    },
    /// One-shot synthesiser command run once per prompt
    ///
    /// Arguments may use `{text}`, `{output}`, `{reference_clip}` and
    /// `{sample_rate}`. Without a `{text}` argument the prompt goes to stdin.
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Where a backend runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Isolation {
    /// Inside the host process
    #[default]
    InProcess,
    /// In a separate process with its own environment
    ///
    /// Without `program`, the current executable is re-invoked as `chorus-gen worker`.
    Subprocess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        program: Option<PathBuf>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
    },
}

fn worker(script: &str, python: &str, params: &[(&str, serde_json::Value)]) -> EngineSpec {
    EngineSpec::Worker {
        program: PathBuf::from(python),
        args: vec![format!("workers/{}", script)],
        env: BTreeMap::new(),
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    }
}

/// The stock backend line-up
fn default_backends() -> Vec<BackendDescriptor> {
    use serde_json::json;

    vec![
        BackendDescriptor {
            name: String::from("qwen3"),
            output_subdir: None,
            sample_rate: 24_000,
            enabled: true,
            reference_clip: None,
            engine: worker(
                "qwen3_worker.py",
                "python3",
                &[
                    ("model", json!("Qwen/Qwen3-TTS-12Hz-1.7B-CustomVoice")),
                    ("speaker", json!("Ryan")),
                    ("device", json!("cuda")),
                ],
            ),
            isolation: Isolation::InProcess,
        },
        BackendDescriptor {
            name: String::from("chatterbox"),
            output_subdir: None,
            sample_rate: 24_000,
            enabled: true,
            reference_clip: Some(PathBuf::from("ref_clip.wav")),
            engine: worker("chatterbox_worker.py", "python3", &[("device", json!("cuda"))]),
            isolation: Isolation::InProcess,
        },
        BackendDescriptor {
            name: String::from("lux"),
            output_subdir: None,
            sample_rate: 48_000,
            enabled: true,
            reference_clip: None,
            engine: worker(
                "lux_worker.py",
                "python3",
                &[("model", json!("YatharthS/LuxTTS")), ("device", json!("cuda"))],
            ),
            isolation: Isolation::InProcess,
        },
        // Pocket needs NumPy 2 and ships its own interpreter
        BackendDescriptor {
            name: String::from("pocket"),
            output_subdir: None,
            sample_rate: 24_000,
            enabled: true,
            reference_clip: None,
            engine: worker(
                "pocket_worker.py",
                ".venv-pocket/bin/python",
                &[("voice", json!("alba"))],
            ),
            isolation: Isolation::Subprocess {
                program: None,
                args: Vec::new(),
                env: BTreeMap::from([(
                    String::from("VIRTUAL_ENV"),
                    String::from(".venv-pocket"),
                )]),
                working_dir: None,
            },
        },
    ]
}

/// Pick the config file to use
///
/// An explicit path wins. Otherwise `./chorus.yaml` if present, else the
/// per-user location.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    default_config_path()
}

/// Get the per-user config file path
///
/// Returns: ~/.config/chorus/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chorus")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns the default config. A file that exists
/// but can't be read or parsed is an error: running the wrong backends for
/// hours is worse than not starting.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        let mut config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: Config =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;

    log::info!(
        "load_config: Loaded config - {} backends, prompts from {:?}",
        config.backends.len(),
        config.prompts.path
    );
    Ok(config)
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(path, yaml).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}
