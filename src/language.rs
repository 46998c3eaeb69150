//! Language tables loaded from TOML.
//!
//! All language-specific behavior (interjections, proper-name heuristics,
//! suffix rules) is data. The built-in tables ship in `data/languages.toml`
//! and a config-supplied file may add or override languages.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{KotobaError, Result};

const BUILTIN_LANGUAGES: &str = include_str!("../data/languages.toml");

fn default_min_word_length() -> usize {
    3
}

fn default_min_stem() -> usize {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProperNameRule {
    /// A capitalized token that does not start a sentence is a proper name.
    #[default]
    Capitalized,
    /// Capitalization carries no proper-name signal.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixRule {
    pub suffix: String,
    pub replacement: String,
    #[serde(default = "default_min_stem")]
    pub min_stem: usize,
}

impl SuffixRule {
    /// Apply the rule to a lowercased word.
    pub fn apply(&self, word: &str) -> Option<String> {
        let stem = word.strip_suffix(self.suffix.as_str())?;
        if stem.chars().count() < self.min_stem {
            return None;
        }
        Some(format!("{}{}", stem, self.replacement))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageProfile {
    #[serde(skip)]
    pub code: String,
    pub name: String,
    #[serde(default = "default_min_word_length")]
    pub min_word_length: usize,
    #[serde(default)]
    pub proper_names: ProperNameRule,
    #[serde(default)]
    pub interjections: HashSet<String>,
    #[serde(default)]
    pub suffix_rules: Vec<SuffixRule>,
}

impl LanguageProfile {
    /// Table used for languages without their own entry: length and numeral
    /// checks only.
    pub fn neutral(code: &str) -> Self {
        Self {
            code: code.to_string(),
            name: code.to_string(),
            min_word_length: default_min_word_length(),
            proper_names: ProperNameRule::None,
            interjections: HashSet::new(),
            suffix_rules: Vec::new(),
        }
    }

    pub fn is_interjection(&self, word: &str) -> bool {
        self.interjections.contains(&word.to_lowercase())
    }

    /// Lookup forms for a surface: the original, its lowercase, then every
    /// suffix-rule lemma guess, without duplicates.
    pub fn candidate_forms(&self, word: &str) -> Vec<String> {
        let mut forms = vec![word.to_string()];
        let lower = word.to_lowercase();
        if lower != word {
            forms.push(lower.clone());
        }

        for rule in &self.suffix_rules {
            if let Some(lemma) = rule.apply(&lower) {
                if !forms.contains(&lemma) {
                    forms.push(lemma);
                }
            }
        }

        forms
    }

    /// Best lemma guess without a vocabulary store: the first suffix rule that
    /// applies, otherwise the lowercased word.
    pub fn heuristic_lemma(&self, word: &str) -> String {
        let lower = word.to_lowercase();
        self.suffix_rules
            .iter()
            .find_map(|rule| rule.apply(&lower))
            .unwrap_or(lower)
    }

    fn normalize(mut self, code: &str) -> Self {
        self.code = code.to_string();
        self.interjections = self.interjections.iter().map(|w| w.to_lowercase()).collect();
        self
    }
}

#[derive(Debug, Deserialize)]
struct LanguageFile {
    #[serde(default)]
    languages: BTreeMap<String, LanguageProfile>,
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// Registry with the tables shipped in the binary.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self {
            profiles: HashMap::new(),
        };
        registry.extend_from_str(BUILTIN_LANGUAGES)?;
        Ok(registry)
    }

    /// Built-in tables plus an optional override file.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut registry = Self::builtin()?;
        if let Some(path) = extra {
            registry.extend_from_file(path)?;
        }
        Ok(registry)
    }

    pub fn extend_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| KotobaError::Config(format!("Failed to read language tables {}: {}", path.display(), e)))?;
        let count = self.extend_from_str(&content)?;
        info!("Loaded {} language tables from {}", count, path.display());
        Ok(())
    }

    /// Add or replace tables from TOML content; returns how many were loaded.
    pub fn extend_from_str(&mut self, content: &str) -> Result<usize> {
        let file: LanguageFile = toml::from_str(content)?;

        let count = file.languages.len();
        for (code, profile) in file.languages {
            let code = normalize_code(&code);
            debug!("Registering language table '{}'", code);
            self.profiles.insert(code.clone(), profile.normalize(&code));
        }
        Ok(count)
    }

    /// Table for a language code; regional tags (`de-AT`, `pt_BR`) fall back
    /// to their primary subtag, unknown languages to a neutral table.
    pub fn get(&self, code: &str) -> Cow<'_, LanguageProfile> {
        let code = normalize_code(code);
        match self.profiles.get(&code) {
            Some(profile) => Cow::Borrowed(profile),
            None => Cow::Owned(LanguageProfile::neutral(&code)),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.profiles.contains_key(&normalize_code(code))
    }

    pub fn profiles(&self) -> Vec<&LanguageProfile> {
        let mut profiles: Vec<&LanguageProfile> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.code.cmp(&b.code));
        profiles
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}
