// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root for `runs/<run_id>/...`. Defaults to `./runs`.
    #[serde(default)]
    pub runs_dir: Option<PathBuf>,

    #[serde(default)]
    pub iteration: IterationConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub translator: TranslatorConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub patcher: PatcherConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    pub max_iterations: u32,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub generation_secs: u64,
    pub probe_secs: u64,
    pub completion_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            generation_secs: 1800,
            probe_secs: 30,
            completion_secs: 60,
        }
    }
}

impl TimeoutsConfig {
    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_secs(self.completion_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Corrective retries after the first attempt.
    pub max_retries: u32,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub subjective: bool,
    /// Scores below this (0-100) add a soft deviation.
    pub subjective_threshold: u8,
    pub allowed_codecs: Vec<String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            subjective: false,
            subjective_threshold: 60,
            allowed_codecs: ["h264", "hevc", "vp9", "av1", "mpeg4", "prores"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherConfig {
    /// Max overrides per (field, direction) within one run.
    pub retry_limit: u32,
    pub min_scene_sec: f64,
    pub max_scene_sec: f64,
    pub max_scene_count: u32,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            min_scene_sec: 1.0,
            max_scene_sec: 30.0,
            max_scene_count: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. Keys are never stored.
    pub api_key_env: String,
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://router.huggingface.co/v1".into(),
            model: "meta-llama/Meta-Llama-3-8B-Instruct".into(),
            api_key_env: "HF_TOKEN".into(),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    #[default]
    Command,
    Placeholder,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub kind: PipelineKind,
    /// Program spawned by the command pipeline.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.runs_dir
            .clone()
            .unwrap_or_else(paths::default_runs_dir)
    }
}
