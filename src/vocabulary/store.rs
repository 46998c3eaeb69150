use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{KotobaError, Result};
use crate::level::CefrLevel;
use super::VocabularyConcept;

/// Lookup-by-word-and-language capability backed by persistent vocabulary data.
#[async_trait]
pub trait VocabularyStore: Send + Sync {
    /// Look up a surface form. `Ok(None)` is a definite miss; `Err` means the
    /// store could not answer.
    async fn lookup(&self, word: &str, language: &str) -> Result<Option<VocabularyConcept>>;
}

/// One entry of a vocabulary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub lemma: String,
    pub language: String,
    #[serde(default)]
    pub level: Option<CefrLevel>,
    #[serde(default)]
    pub forms: Vec<String>,
}

/// In-memory store indexed by lowercased (language, form). Every form of an
/// entry, and its lemma, resolves to the same concept.
#[derive(Debug, Default, Clone)]
pub struct MemoryVocabularyStore {
    concepts: Vec<VocabularyConcept>,
    index: HashMap<(String, String), usize>,
}

impl MemoryVocabularyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<VocabularyEntry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    /// Load a JSON array of [`VocabularyEntry`].
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(KotobaError::NotFound(format!(
                "Vocabulary store {}",
                path.display()
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let entries: Vec<VocabularyEntry> = serde_json::from_str(&content)?;
        let store = Self::from_entries(entries);

        info!(
            "Loaded vocabulary store with {} concepts from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn insert(&mut self, entry: VocabularyEntry) {
        let language = entry.language.to_lowercase();
        let concept = VocabularyConcept::new(entry.lemma.clone(), language.clone(), entry.level)
            .with_forms(entry.forms.iter().cloned());

        let idx = self.concepts.len();
        for form in concept.candidate_forms.iter() {
            let key = (language.clone(), form.to_lowercase());
            // First entry wins for ambiguous forms
            self.index.entry(key).or_insert(idx);
        }
        self.concepts.push(concept);
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

#[async_trait]
impl VocabularyStore for MemoryVocabularyStore {
    async fn lookup(&self, word: &str, language: &str) -> Result<Option<VocabularyConcept>> {
        let key = (language.to_lowercase(), word.to_lowercase());
        let concept = self.index.get(&key).map(|&idx| self.concepts[idx].clone());
        debug!("Store lookup '{}' ({}): {}", word, language, if concept.is_some() { "hit" } else { "miss" });
        Ok(concept)
    }
}
