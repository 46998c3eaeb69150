// Vocabulary resolution
//
// This module maps surface forms to canonical vocabulary concepts:
// - store: the VocabularyStore collaborator contract and a file-backed implementation
// - resolver: per-run resolution with the lemma/concept caches
//
// The resolver never owns persistence; a store implementation does. Each
// pipeline run builds its own resolver so cached results stay scoped to one
// learner and one language.

pub mod resolver;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use resolver::*;
pub use store::*;

use crate::level::CefrLevel;

/// Canonical vocabulary entry resolved from a surface form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyConcept {
    pub lemma: String,
    pub language: String,
    /// `None` when the difficulty could not be resolved.
    pub difficulty_level: Option<CefrLevel>,
    pub candidate_forms: BTreeSet<String>,
}

impl VocabularyConcept {
    pub fn new(
        lemma: impl Into<String>,
        language: impl Into<String>,
        difficulty_level: Option<CefrLevel>,
    ) -> Self {
        let lemma = lemma.into();
        let mut candidate_forms = BTreeSet::new();
        candidate_forms.insert(lemma.clone());

        Self {
            lemma,
            language: language.into(),
            difficulty_level,
            candidate_forms,
        }
    }

    pub fn with_forms<I, S>(mut self, forms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidate_forms.extend(forms.into_iter().map(Into::into));
        self
    }
}
