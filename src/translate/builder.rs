use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{ClassifiedSegment, FilteringResult, SegmentClassifier};
use crate::config::TranslationScope;
use crate::error::{KotobaError, Result};
use crate::filter::{KnownWords, WordFilter, WordStatus};
use crate::level::CefrLevel;
use super::Translator;

/// Translation work for one blocker segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationSegment {
    pub segment_id: u32,
    pub source_text: String,
    /// Distinct unknown surfaces, in order of appearance.
    pub unknown_words: Vec<String>,
    pub start: f64,
    pub end: f64,
}

impl From<&ClassifiedSegment> for TranslationSegment {
    fn from(segment: &ClassifiedSegment) -> Self {
        Self {
            segment_id: segment.segment.id,
            source_text: segment.segment.text.clone(),
            unknown_words: segment.unknown_words(),
            start: segment.segment.start,
            end: segment.segment.end,
        }
    }
}

/// Builds the minimal translation request from a filtering result.
#[derive(Debug, Clone, Copy)]
pub struct TranslationSegmentBuilder {
    proficiency: CefrLevel,
}

impl TranslationSegmentBuilder {
    pub fn new(proficiency: CefrLevel) -> Self {
        Self { proficiency }
    }

    /// One `TranslationSegment` per blocker segment. With an override set,
    /// the result is refiltered first (see [`Self::refilter`]).
    pub fn build(&self, result: &FilteringResult, known_override: Option<&KnownWords>) -> Vec<TranslationSegment> {
        match known_override {
            Some(known) => {
                let refiltered = self.refilter(result, known);
                Self::collect(&refiltered)
            }
            None => Self::collect(result),
        }
    }

    /// Re-run the word filter and segment classifier with an updated
    /// known-word set. Only words that were unknown are re-evaluated, so the
    /// unknown set can shrink or stay equal but never grow.
    pub fn refilter(&self, result: &FilteringResult, known: &KnownWords) -> FilteringResult {
        let segments = result
            .segments
            .iter()
            .map(|segment| {
                let words = segment
                    .words
                    .iter()
                    .map(|word| {
                        let mut word = word.clone();
                        if word.status == WordStatus::Unknown {
                            word.status = WordFilter::classify(&word.resolved, known, self.proficiency);
                        }
                        word
                    })
                    .collect();
                SegmentClassifier::classify(segment.segment.clone(), words)
            })
            .collect();

        let refiltered = FilteringResult::from_segments(segments);
        debug!(
            "Refilter: unknown words {} -> {}, blocker segments {} -> {}",
            result.statistics.unknown_count,
            refiltered.statistics.unknown_count,
            result.statistics.blocker_segment_count,
            refiltered.statistics.blocker_segment_count
        );
        refiltered
    }

    fn collect(result: &FilteringResult) -> Vec<TranslationSegment> {
        result.blockers().map(TranslationSegment::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTranslation {
    pub segment_id: u32,
    pub source_text: String,
    pub translated_text: String,
    /// Per-word glosses, filled in `words` scope.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub glosses: BTreeMap<String, String>,
}

/// Result of the translation stage. On failure the translations are empty,
/// `translation_failed` is set, and the known-word data is still present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub translations: Vec<SegmentTranslation>,
    pub known_words: Vec<String>,
    pub translation_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationOutcome {
    pub fn skipped(known_words: Vec<String>) -> Self {
        Self {
            known_words,
            ..Self::default()
        }
    }

    pub fn fallback(known_words: Vec<String>, error: &KotobaError) -> Self {
        Self {
            translations: Vec::new(),
            known_words,
            translation_failed: true,
            error: Some(error.to_string()),
        }
    }

    pub fn translation_for(&self, segment_id: u32) -> Option<&SegmentTranslation> {
        self.translations.iter().find(|t| t.segment_id == segment_id)
    }
}

/// Sends translation segments to a translator with a per-call timeout.
pub struct TranslationRunner {
    translator: Arc<dyn Translator>,
    scope: TranslationScope,
    timeout: Duration,
}

impl TranslationRunner {
    pub fn new(translator: Arc<dyn Translator>, scope: TranslationScope, timeout: Duration) -> Self {
        Self {
            translator,
            scope,
            timeout,
        }
    }

    /// Translate every segment. Any failure or timeout turns the whole
    /// stage into a fallback outcome instead of an error. Cancellation is
    /// the only error: no new call is issued once `cancel` fires, and a call
    /// already in flight is allowed to finish.
    pub async fn run(
        &self,
        segments: &[TranslationSegment],
        source_language: &str,
        target_language: &str,
        known_words: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome> {
        if segments.is_empty() {
            info!("No blocker segments; nothing to translate");
            return Ok(TranslationOutcome::skipped(known_words));
        }

        let result = match self.scope {
            TranslationScope::Segment => {
                self.translate_lines(segments, source_language, target_language, cancel)
                    .await
            }
            TranslationScope::Words => {
                self.gloss_words(segments, source_language, target_language, cancel)
                    .await
            }
        };

        match result {
            Ok(translations) => {
                info!("Translated {} segments to {}", translations.len(), target_language);
                Ok(TranslationOutcome {
                    translations,
                    known_words,
                    translation_failed: false,
                    error: None,
                })
            }
            Err(KotobaError::Cancelled) => {
                info!("Translation stopped by cancellation");
                Err(KotobaError::Cancelled)
            }
            Err(e) => {
                warn!("Translation unavailable, returning known-word fallback: {}", e);
                Ok(TranslationOutcome::fallback(known_words, &e))
            }
        }
    }

    async fn translate_lines(
        &self,
        segments: &[TranslationSegment],
        source_language: &str,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SegmentTranslation>> {
        let mut translations = Vec::with_capacity(segments.len());

        for (idx, segment) in segments.iter().enumerate() {
            info!("┌─ Translating segment {}/{} ────────", idx + 1, segments.len());
            info!("│ Source: {}", segment.source_text);

            let translated = self
                .call(&segment.source_text, source_language, target_language, cancel)
                .await?;

            info!("│ Target: {}", translated);
            info!("└─────────────────────────────────────");

            translations.push(SegmentTranslation {
                segment_id: segment.segment_id,
                source_text: segment.source_text.clone(),
                translated_text: translated,
                glosses: BTreeMap::new(),
            });
        }

        Ok(translations)
    }

    async fn gloss_words(
        &self,
        segments: &[TranslationSegment],
        source_language: &str,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SegmentTranslation>> {
        // Each distinct word is glossed once per run
        let mut glossary: BTreeMap<String, String> = BTreeMap::new();
        let mut translations = Vec::with_capacity(segments.len());

        for segment in segments {
            let mut glosses = BTreeMap::new();
            for word in &segment.unknown_words {
                let gloss = match glossary.get(word) {
                    Some(gloss) => gloss.clone(),
                    None => {
                        let gloss = self.call(word, source_language, target_language, cancel).await?;
                        debug!("Gloss {} -> {}", word, gloss);
                        glossary.insert(word.clone(), gloss.clone());
                        gloss
                    }
                };
                glosses.insert(word.clone(), gloss);
            }

            let translated_text = segment
                .unknown_words
                .iter()
                .filter_map(|w| glosses.get(w).map(|g| format!("{}: {}", w, g)))
                .collect::<Vec<_>>()
                .join("; ");

            translations.push(SegmentTranslation {
                segment_id: segment.segment_id,
                source_text: segment.source_text.clone(),
                translated_text,
                glosses,
            });
        }

        Ok(translations)
    }

    async fn call(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(KotobaError::Cancelled);
        }
        tokio::time::timeout(
            self.timeout,
            self.translator.translate(text, source_language, target_language),
        )
        .await
        .map_err(|_| KotobaError::Timeout(format!("translation after {:?}", self.timeout)))?
    }
}
