use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TranslateConfig;
use crate::error::{KotobaError, Result};
use super::Translator;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TranslationPayload {
    text: String,
}

/// Translator backed by Ollama's `/api/generate` endpoint in JSON mode.
pub struct OllamaTranslator {
    client: Client,
    config: TranslateConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        // Per-call deadlines are enforced by the caller; this only bounds a stuck socket
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self { client, config })
    }

    /// Check that Ollama is reachable and the configured model is pulled.
    pub async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.config.endpoint);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.config.model }))
            .send()
            .await
            .map_err(|e| KotobaError::Translation(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.config.model);
            Ok(())
        } else {
            Err(KotobaError::Translation(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.config.model, self.config.model
            )))
        }
    }

    fn build_prompt(text: &str, source_language: &str, target_language: &str) -> String {
        let source_name = language_code_to_name(source_language);
        let target_name = language_code_to_name(target_language);

        if text.split_whitespace().count() == 1 {
            format!(
                "You are a dictionary for language learners.\n\
                 \n\
                 Give the most common {} meaning of the {} word below, in a few words.\n\
                 Return ONLY JSON as {{\"text\":\"meaning in {}\"}}.\n\
                 \n\
                 Word: \"{}\"\n",
                target_name, source_name, target_name, text
            )
        } else {
            format!(
                "You are a professional subtitle translator.\n\
                 \n\
                 CRITICAL: Translate the {} subtitle line below to {} ONLY.\n\
                 The target language is: {} (language code: {})\n\
                 \n\
                 Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
                 Do not include any explanations, alternatives, or text in other languages.\n\
                 \n\
                 [Subtitle line]\n\
                 {}\n",
                source_name, target_name, target_name, target_language, target_name, text
            )
        }
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate(&self, text: &str, source_language: &str, target_language: &str) -> Result<String> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: Self::build_prompt(text, source_language, target_language),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| KotobaError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KotobaError::Translation(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| KotobaError::Translation(format!("Failed to parse response: {}", e)))?;

        extract_translation(&generated.response)
    }
}

/// Pull the translation out of a model reply, tolerating models that
/// ignore the JSON instruction.
fn extract_translation(raw: &str) -> Result<String> {
    let raw = raw.trim();
    debug!("Raw Ollama response: {}", raw);

    if raw.is_empty() {
        return Err(KotobaError::Translation("Empty translation received".to_string()));
    }

    if let Ok(payload) = serde_json::from_str::<TranslationPayload>(raw) {
        let text = payload.text.trim();
        if text.is_empty() {
            return Err(KotobaError::Translation("Empty translation received".to_string()));
        }
        return Ok(text.to_string());
    }

    Ok(clean_translation_response(raw))
}

fn clean_translation_response(response: &str) -> String {
    let is_chatter = |line: &str| {
        line.starts_with("Here are")
            || line.starts_with("Here is")
            || line.starts_with("Option")
            || line.starts_with("**Option")
            || line.starts_with("Translation:")
            || line.starts_with("- ")
            || line.starts_with("* ")
            || (line.starts_with("**") && line.ends_with("**"))
    };

    response
        .lines()
        .map(str::trim)
        .find(|line| line.len() > 3 && !is_chatter(*line))
        .or_else(|| response.lines().map(str::trim).find(|line| !line.is_empty()))
        .unwrap_or(response)
        .to_string()
}

fn language_code_to_name(code: &str) -> String {
    let name = match code.to_lowercase().as_str() {
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "it" => "Italian",
        "pt" => "Portuguese",
        "pl" => "Polish",
        "nl" => "Dutch",
        "tr" => "Turkish",
        "sv" => "Swedish",
        "da" => "Danish",
        "no" => "Norwegian",
        "fi" => "Finnish",
        "cs" => "Czech",
        "uk" => "Ukrainian",
        "en" => "English",
        _ => return code.to_string(),
    };
    name.to_string()
}
