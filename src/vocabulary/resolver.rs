use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{KotobaError, Result};
use crate::language::LanguageRegistry;
use crate::level::CefrLevel;
use crate::segment::Word;
use crate::validator::{RejectReason, Validation};
use super::{VocabularyConcept, VocabularyStore};

/// Cache key: (language, form). Keying by language keeps results from one
/// language from answering lookups in another.
type CacheKey = (String, String);

/// In-run caches owned by one resolver.
#[derive(Debug, Default)]
pub struct ResolverCache {
    lemmas: HashMap<CacheKey, String>,
    concepts: HashMap<CacheKey, Option<VocabularyConcept>>,
    /// Forms whose lookup errored; never retried within the run.
    failed: HashSet<CacheKey>,
    /// Words answered with a heuristic concept after a failure.
    fallbacks: HashSet<CacheKey>,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lemma(&self, word: &str, language: &str) -> Option<&str> {
        self.lemmas.get(&key(language, word)).map(String::as_str)
    }

    pub fn concept_entries(&self) -> usize {
        self.concepts.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    /// Round-trips sent to the store.
    pub lookups: u64,
    pub cache_hits: u64,
    pub resolved: u64,
    pub not_found: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The store returned a concept.
    Store,
    /// The store has no entry; lemma and forms are heuristic.
    NotFound,
    /// The store failed; lemma and forms are heuristic, difficulty unresolved.
    Fallback,
    /// Not a vocabulary candidate; no lookup was made.
    Skipped,
}

/// A token with its vocabulary resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedWord {
    #[serde(flatten)]
    pub word: Word,
    pub lemma: String,
    pub difficulty_level: Option<CefrLevel>,
    pub candidate_forms: Vec<String>,
    pub is_vocabulary_candidate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    pub resolution: Resolution,
}

pub struct VocabularyResolver {
    store: Arc<dyn VocabularyStore>,
    languages: Arc<LanguageRegistry>,
    cache: ResolverCache,
    lookup_timeout: Option<Duration>,
    stats: ResolverStats,
}

impl VocabularyResolver {
    pub fn new(store: Arc<dyn VocabularyStore>, languages: Arc<LanguageRegistry>) -> Self {
        Self {
            store,
            languages,
            cache: ResolverCache::new(),
            lookup_timeout: None,
            stats: ResolverStats::default(),
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn cache(&self) -> &ResolverCache {
        &self.cache
    }

    /// Resolve a surface form to a concept.
    ///
    /// Tries the exact form, then its candidate forms, and caches every
    /// answer including misses, so each (form, language) pair reaches the
    /// store at most once per resolver. A store failure is absorbed: the
    /// result is a heuristic concept with unresolved difficulty.
    pub async fn resolve(&mut self, word: &str, language: &str) -> Option<VocabularyConcept> {
        let word_key = key(language, word);
        if let Some(cached) = self.cache.concepts.get(&word_key) {
            self.stats.cache_hits += 1;
            return cached.clone();
        }

        let languages = Arc::clone(&self.languages);
        let profile = languages.get(language);
        let forms = profile.candidate_forms(word);
        let mut found = None;
        let mut failed = false;

        for form in &forms {
            let form_key = key(language, form);

            // A form that already failed makes this word a fallback too
            if self.cache.failed.contains(&form_key) {
                failed = true;
                break;
            }

            if let Some(cached) = self.cache.concepts.get(&form_key) {
                self.stats.cache_hits += 1;
                if cached.is_some() {
                    found = cached.clone();
                    break;
                }
                continue;
            }

            match self.lookup_once(form, language).await {
                Ok(result) => {
                    self.cache.concepts.insert(form_key, result.clone());
                    if result.is_some() {
                        found = result;
                        break;
                    }
                }
                Err(e) => {
                    warn!("Vocabulary lookup for '{}' ({}) failed, using heuristics: {}", form, language, e);
                    self.stats.failures += 1;
                    self.cache.failed.insert(form_key);
                    failed = true;
                    break;
                }
            }
        }

        let result = match found {
            Some(concept) => {
                self.stats.resolved += 1;
                Some(concept)
            }
            None if failed => {
                self.cache.fallbacks.insert(word_key.clone());
                let mut concept = VocabularyConcept::new(profile.heuristic_lemma(word), profile.code.clone(), None);
                concept.candidate_forms.extend(forms.iter().map(|f| f.to_lowercase()));
                Some(concept)
            }
            None => {
                self.stats.not_found += 1;
                None
            }
        };

        let lemma = result
            .as_ref()
            .map(|concept| concept.lemma.clone())
            .unwrap_or_else(|| profile.heuristic_lemma(word));
        self.cache.lemmas.insert(word_key.clone(), lemma);
        self.cache.concepts.insert(word_key, result.clone());

        result
    }

    /// Resolve a validated token. Tokens that are not vocabulary candidates
    /// are never sent to the store.
    pub async fn resolve_word(&mut self, word: &Word, validation: Validation, language: &str) -> ResolvedWord {
        if !validation.valid {
            return ResolvedWord {
                lemma: word.surface.to_lowercase(),
                word: word.clone(),
                difficulty_level: None,
                candidate_forms: Vec::new(),
                is_vocabulary_candidate: false,
                reject_reason: validation.reason,
                resolution: Resolution::Skipped,
            };
        }

        let concept = self.resolve(&word.surface, language).await;
        let profile = self.languages.get(language);

        match concept {
            Some(concept) => {
                let resolution = if self.cache.fallbacks.contains(&key(language, &word.surface)) {
                    Resolution::Fallback
                } else {
                    Resolution::Store
                };

                let mut candidate_forms: Vec<String> = concept.candidate_forms.into_iter().collect();
                if !candidate_forms.contains(&concept.lemma) {
                    candidate_forms.push(concept.lemma.clone());
                }

                ResolvedWord {
                    word: word.clone(),
                    lemma: concept.lemma,
                    difficulty_level: concept.difficulty_level,
                    candidate_forms,
                    is_vocabulary_candidate: true,
                    reject_reason: None,
                    resolution,
                }
            }
            None => ResolvedWord {
                word: word.clone(),
                lemma: self
                    .cache
                    .lemma(&word.surface, language)
                    .map(str::to_string)
                    .unwrap_or_else(|| profile.heuristic_lemma(&word.surface)),
                difficulty_level: None,
                candidate_forms: profile.candidate_forms(&word.surface),
                is_vocabulary_candidate: true,
                reject_reason: None,
                resolution: Resolution::NotFound,
            },
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Vocabulary resolution: {} store lookups, {} cache hits, {} resolved, {} not found, {} failures ({} cached concepts)",
            self.stats.lookups,
            self.stats.cache_hits,
            self.stats.resolved,
            self.stats.not_found,
            self.stats.failures,
            self.cache.concept_entries()
        );
    }

    async fn lookup_once(&mut self, form: &str, language: &str) -> Result<Option<VocabularyConcept>> {
        self.stats.lookups += 1;
        debug!("Looking up '{}' ({})", form, language);

        let lookup = self.store.lookup(form, language);
        match self.lookup_timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| KotobaError::Timeout(format!("vocabulary lookup for '{}' after {:?}", form, limit)))?,
            None => lookup.await,
        }
    }
}

fn key(language: &str, form: &str) -> CacheKey {
    (language.to_lowercase(), form.to_string())
}
