use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::level::CefrLevel;
use crate::vocabulary::ResolvedWord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordStatus {
    Known,
    Unknown,
    Skipped,
}

/// Case-insensitive set of words a learner already knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownWords {
    words: HashSet<String>,
}

impl KnownWords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, word: &str) -> bool {
        self.words.insert(word.trim().to_lowercase())
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }

    pub fn extend<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            self.insert(word.as_ref());
        }
    }

    /// Union with another set.
    pub fn merged(&self, other: &KnownWords) -> KnownWords {
        let mut merged = self.clone();
        merged.words.extend(other.words.iter().cloned());
        merged
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for KnownWords {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut known = KnownWords::new();
        known.extend(iter);
        known
    }
}

/// A resolved word with its learner-specific status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedWord {
    #[serde(flatten)]
    pub resolved: ResolvedWord,
    pub status: WordStatus,
}

impl ClassifiedWord {
    pub fn surface(&self) -> &str {
        &self.resolved.word.surface
    }
}

/// Known/unknown decision for a single word.
///
/// `classify` depends only on its arguments, so refiltering after the
/// learner marks more words as known is just another call with a larger set.
pub struct WordFilter;

impl WordFilter {
    pub fn classify(resolved: &ResolvedWord, known_words: &KnownWords, proficiency: CefrLevel) -> WordStatus {
        if !resolved.is_vocabulary_candidate {
            return WordStatus::Skipped;
        }

        let listed = known_words.contains(&resolved.lemma)
            || known_words.contains(&resolved.word.surface)
            || resolved.candidate_forms.iter().any(|form| known_words.contains(form));
        if listed {
            return WordStatus::Known;
        }

        match resolved.difficulty_level {
            Some(level) if level <= proficiency => WordStatus::Known,
            _ => WordStatus::Unknown,
        }
    }

    pub fn apply(resolved: ResolvedWord, known_words: &KnownWords, proficiency: CefrLevel) -> ClassifiedWord {
        let status = Self::classify(&resolved, known_words, proficiency);
        ClassifiedWord { resolved, status }
    }
}
