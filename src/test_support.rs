//! Mock collaborators shared by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{KotobaError, Result};
use crate::level::CefrLevel;
use crate::segment::Segment;
use crate::transcribe::Transcriber;
use crate::translate::Translator;
use crate::vocabulary::{VocabularyConcept, VocabularyStore};

/// Store that records every lookup and can be told to fail on given forms.
#[derive(Default)]
pub struct CountingStore {
    concepts: HashMap<(String, String), VocabularyConcept>,
    failing: HashSet<String>,
    calls: Mutex<HashMap<(String, String), usize>>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concept under its lemma and every given form (exact match).
    pub fn with(mut self, language: &str, lemma: &str, level: CefrLevel, forms: &[&str]) -> Self {
        let concept = VocabularyConcept::new(lemma, language, Some(level)).with_forms(forms.iter().copied());
        for form in concept.candidate_forms.iter() {
            self.concepts
                .insert((language.to_string(), form.clone()), concept.clone());
        }
        self
    }

    pub fn failing_on(mut self, form: &str) -> Self {
        self.failing.insert(form.to_string());
        self
    }

    pub fn calls_for(&self, word: &str, language: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(language.to_string(), word.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl VocabularyStore for CountingStore {
    async fn lookup(&self, word: &str, language: &str) -> Result<Option<VocabularyConcept>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry((language.to_string(), word.to_string()))
            .or_insert(0) += 1;

        if self.failing.contains(word) {
            return Err(KotobaError::Lookup(format!("backend unavailable for '{}'", word)));
        }

        Ok(self
            .concepts
            .get(&(language.to_string(), word.to_string()))
            .cloned())
    }
}

/// German vocabulary used by the "Der Hund läuft schnell." scenario.
pub fn german_store() -> CountingStore {
    CountingStore::new()
        .with("de", "der", CefrLevel::A1, &["der", "die", "das"])
        .with("de", "Hund", CefrLevel::B1, &["Hunde"])
        .with("de", "laufen", CefrLevel::A2, &["läuft", "lief"])
        .with("de", "schnell", CefrLevel::A2, &["schneller"])
}

pub enum TranslatorBehavior {
    Echo,
    Fail,
    Delay(Duration),
}

/// Translator that prefixes the target language, fails, or stalls.
pub struct ScriptedTranslator {
    behavior: TranslatorBehavior,
    calls: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTranslator {
    pub fn new(behavior: TranslatorBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str, _source_language: &str, target_language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(text.to_string());

        match self.behavior {
            TranslatorBehavior::Echo => Ok(format!("[{}] {}", target_language, text)),
            TranslatorBehavior::Fail => Err(KotobaError::Translation("model not loaded".to_string())),
            TranslatorBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(format!("[{}] {}", target_language, text))
            }
        }
    }
}

/// Transcriber returning fixed segments, optionally after a delay or failing.
pub struct StaticTranscriber {
    segments: Vec<Segment>,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StaticTranscriber {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping transcribe calls seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, _audio_path: &Path, _language: Option<&str>) -> Result<Vec<Segment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(KotobaError::Transcription("model crashed".to_string()));
        }
        Ok(self.segments.clone())
    }
}
