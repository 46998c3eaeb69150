use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KotobaError, Result};
use crate::level::CefrLevel;

fn default_translation_enabled() -> bool {
    true
}

fn default_lookup_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub vocabulary: VocabularyConfig,
    pub learner: LearnerConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the whisper.cpp CLI binary
    pub binary_path: String,
    /// Path to the ggml model file
    pub model_path: String,
    /// Number of threads passed to whisper.cpp
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Translate blocker segments at all
    #[serde(default = "default_translation_enabled")]
    pub enabled: bool,
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// What gets sent to the translator for each blocker segment
    pub scope: TranslationScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationScope {
    /// Translate the whole subtitle line
    Segment,
    /// Gloss only the unknown words of the line
    Words,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyConfig {
    /// JSON vocabulary file used by the file-backed store
    pub store_path: PathBuf,
    /// Extra language tables merged over the built-in ones
    #[serde(default)]
    pub languages_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Directory holding one `<user>.toml` profile per learner
    pub profiles_dir: PathBuf,
    /// Proficiency assumed when a profile does not set one
    pub default_level: CefrLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chunk jobs allowed to run at the same time
    pub max_concurrent_jobs: usize,
    /// Upper bound for one transcription call
    pub transcription_timeout_secs: u64,
    /// Upper bound for one translation call
    pub translation_timeout_secs: u64,
    /// Upper bound for one vocabulary lookup
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl PipelineConfig {
    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_timeout_secs)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_secs(self.translation_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            transcription_timeout_secs: 600,
            translation_timeout_secs: 120,
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcriber: TranscriberConfig {
                binary_path: "whisper-cli".to_string(),
                model_path: ".kotoba/models/ggml-medium.bin".to_string(),
                threads: 4,
            },
            translate: TranslateConfig {
                enabled: true,
                endpoint: "http://localhost:11434".to_string(),
                model: "llama3.2:3b".to_string(),
                scope: TranslationScope::Segment,
            },
            vocabulary: VocabularyConfig {
                store_path: PathBuf::from(".kotoba/vocabulary.json"),
                languages_path: None,
            },
            learner: LearnerConfig {
                profiles_dir: PathBuf::from(".kotoba/learners"),
                default_level: CefrLevel::A1,
            },
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KotobaError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| KotobaError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KotobaError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| KotobaError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_concurrent_jobs == 0 {
            return Err(KotobaError::Config(
                "pipeline.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.pipeline.transcription_timeout_secs == 0
            || self.pipeline.translation_timeout_secs == 0
            || self.pipeline.lookup_timeout_ms == 0
        {
            return Err(KotobaError::Config(
                "pipeline timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
