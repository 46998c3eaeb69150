// Selective translation
//
// This module turns classified subtitles into the smallest possible
// translation workload:
// - builder: TranslationSegment construction, the refilter pass and the
//   fallback-aware translation run
// - ollama: Translator implementation backed by a local Ollama server

pub mod builder;
pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;

pub use builder::*;
pub use ollama::OllamaTranslator;
use crate::config::TranslateConfig;
use crate::error::Result;

/// Machine translation collaborator.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from `source_language` into `target_language`.
    async fn translate(&self, text: &str, source_language: &str, target_language: &str) -> Result<String>;
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    /// Translator for the configuration, or `None` when translation is disabled
    pub fn create_translator(config: &TranslateConfig) -> Result<Option<Arc<dyn Translator>>> {
        if !config.enabled {
            return Ok(None);
        }
        Ok(Some(Arc::new(OllamaTranslator::new(config.clone())?)))
    }
}
