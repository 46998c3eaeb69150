use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::language::{LanguageRegistry, ProperNameRule};
use crate::segment::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooShort,
    Numeral,
    Interjection,
    ProperName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<RejectReason>,
}

impl Validation {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Decides whether a token is worth tracking as vocabulary. Pure: the
/// outcome depends only on the token and the language table.
#[derive(Debug, Clone)]
pub struct WordValidator {
    languages: Arc<LanguageRegistry>,
}

impl WordValidator {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self { languages }
    }

    pub fn is_vocabulary_candidate(&self, word: &Word, language: &str) -> Validation {
        self.check(&word.surface, language, word.sentence_initial)
    }

    pub fn check(&self, surface: &str, language: &str, sentence_initial: bool) -> Validation {
        let profile = self.languages.get(language);

        if surface.chars().count() < profile.min_word_length {
            return Validation::rejected(RejectReason::TooShort);
        }

        // Numbers, including decimals and grouped digits ("3.5", "1,000")
        if !surface.chars().any(char::is_alphabetic) {
            return Validation::rejected(RejectReason::Numeral);
        }

        if profile.is_interjection(surface) {
            return Validation::rejected(RejectReason::Interjection);
        }

        if profile.proper_names == ProperNameRule::Capitalized
            && !sentence_initial
            && surface.chars().next().is_some_and(char::is_uppercase)
        {
            return Validation::rejected(RejectReason::ProperName);
        }

        Validation::accepted()
    }
}
