//! Learner known-word profiles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{KotobaError, Result};
use crate::filter::KnownWords;
use crate::language::normalize_code;
use crate::level::CefrLevel;

/// Source of a learner's known words and proficiency level.
#[async_trait]
pub trait KnownWordsProvider: Send + Sync {
    async fn get_known_words(&self, user_id: &str, language: &str) -> Result<KnownWords>;

    async fn get_proficiency_level(&self, user_id: &str, language: &str) -> Result<CefrLevel>;
}

/// Known words held in memory, keyed by (user, language).
#[derive(Debug, Clone)]
pub struct InMemoryKnownWords {
    words: HashMap<(String, String), KnownWords>,
    levels: HashMap<(String, String), CefrLevel>,
    default_level: CefrLevel,
}

impl InMemoryKnownWords {
    pub fn new(default_level: CefrLevel) -> Self {
        Self {
            words: HashMap::new(),
            levels: HashMap::new(),
            default_level,
        }
    }

    pub fn with_words<I, S>(mut self, user_id: &str, language: &str, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.words
            .entry(key(user_id, language))
            .or_default()
            .extend(words);
        self
    }

    pub fn with_level(mut self, user_id: &str, language: &str, level: CefrLevel) -> Self {
        self.levels.insert(key(user_id, language), level);
        self
    }
}

#[async_trait]
impl KnownWordsProvider for InMemoryKnownWords {
    async fn get_known_words(&self, user_id: &str, language: &str) -> Result<KnownWords> {
        Ok(self
            .words
            .get(&key(user_id, language))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_proficiency_level(&self, user_id: &str, language: &str) -> Result<CefrLevel> {
        Ok(self
            .levels
            .get(&key(user_id, language))
            .copied()
            .unwrap_or(self.default_level))
    }
}

fn key(user_id: &str, language: &str) -> (String, String) {
    (user_id.to_string(), normalize_code(language))
}

/// On-disk learner profile, `<profiles_dir>/<user>.toml`:
///
/// ```toml
/// [languages.de]
/// level = "A2"
/// known = ["der", "laufen"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnerProfile {
    #[serde(default)]
    pub languages: HashMap<String, LanguageProgress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageProgress {
    #[serde(default)]
    pub level: Option<CefrLevel>,
    #[serde(default)]
    pub known: Vec<String>,
}

impl LearnerProfile {
    fn progress(&self, language: &str) -> Option<&LanguageProgress> {
        let code = normalize_code(language);
        self.languages
            .iter()
            .find(|(lang, _)| normalize_code(lang) == code)
            .map(|(_, progress)| progress)
    }
}

/// Known-words provider backed by per-user TOML profiles.
pub struct ProfileKnownWords {
    profiles_dir: PathBuf,
    default_level: CefrLevel,
}

impl ProfileKnownWords {
    pub fn new<P: AsRef<Path>>(profiles_dir: P, default_level: CefrLevel) -> Self {
        Self {
            profiles_dir: profiles_dir.as_ref().to_path_buf(),
            default_level,
        }
    }

    fn profile_path(&self, user_id: &str) -> Result<PathBuf> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !user_id.starts_with('.');
        if !valid {
            return Err(KotobaError::KnownWords(format!("Invalid user id: {:?}", user_id)));
        }
        Ok(self.profiles_dir.join(format!("{}.toml", user_id)))
    }

    /// Load a profile; a missing file is an empty profile.
    pub async fn load_profile(&self, user_id: &str) -> Result<LearnerProfile> {
        let path = self.profile_path(user_id)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No profile for learner '{}' at {}", user_id, path.display());
                return Ok(LearnerProfile::default());
            }
            Err(e) => {
                return Err(KotobaError::KnownWords(format!(
                    "Failed to read profile {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        toml::from_str(&content).map_err(|e| {
            KotobaError::KnownWords(format!("Failed to parse profile {}: {}", path.display(), e))
        })
    }

    pub async fn save_profile(&self, user_id: &str, profile: &LearnerProfile) -> Result<()> {
        let path = self.profile_path(user_id)?;
        tokio::fs::create_dir_all(&self.profiles_dir).await?;

        let content = toml::to_string_pretty(profile)
            .map_err(|e| KotobaError::KnownWords(format!("Failed to serialize profile: {}", e)))?;
        tokio::fs::write(&path, content).await?;

        info!("Saved learner profile: {}", path.display());
        Ok(())
    }

    /// Add words to a learner's known list for one language.
    pub async fn mark_known<I, S>(&self, user_id: &str, language: &str, words: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut profile = self.load_profile(user_id).await?;
        let progress = profile.languages.entry(normalize_code(language)).or_default();

        let mut existing: KnownWords = progress.known.iter().collect();
        let mut added = 0;
        for word in words {
            let word = word.as_ref().trim();
            if !word.is_empty() && existing.insert(word) {
                progress.known.push(word.to_lowercase());
                added += 1;
            }
        }

        self.save_profile(user_id, &profile).await?;
        Ok(added)
    }
}

#[async_trait]
impl KnownWordsProvider for ProfileKnownWords {
    async fn get_known_words(&self, user_id: &str, language: &str) -> Result<KnownWords> {
        let profile = self.load_profile(user_id).await?;
        Ok(profile
            .progress(language)
            .map(|p| p.known.iter().collect())
            .unwrap_or_default())
    }

    async fn get_proficiency_level(&self, user_id: &str, language: &str) -> Result<CefrLevel> {
        let profile = self.load_profile(user_id).await?;
        Ok(profile
            .progress(language)
            .and_then(|p| p.level)
            .unwrap_or(self.default_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_provider() {
        let provider = InMemoryKnownWords::new(CefrLevel::A1)
            .with_words("anna", "de", ["der", "laufen"])
            .with_level("anna", "de-AT", CefrLevel::B1);

        let known = provider.get_known_words("anna", "DE").await.unwrap();
        assert!(known.contains("Laufen"));
        assert_eq!(provider.get_proficiency_level("anna", "de").await.unwrap(), CefrLevel::B1);

        assert!(provider.get_known_words("ben", "de").await.unwrap().is_empty());
        assert_eq!(provider.get_proficiency_level("ben", "de").await.unwrap(), CefrLevel::A1);
    }

    #[tokio::test]
    async fn test_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("anna.toml"),
            "[languages.de]\nlevel = \"A2\"\nknown = [\"der\", \"Laufen\"]\n\n[languages.fr]\nknown = [\"le\"]\n",
        )
        .unwrap();

        let provider = ProfileKnownWords::new(dir.path(), CefrLevel::A1);
        let known = provider.get_known_words("anna", "de").await.unwrap();
        assert_eq!(known.len(), 2);
        assert!(known.contains("laufen"));
        assert_eq!(provider.get_proficiency_level("anna", "de").await.unwrap(), CefrLevel::A2);
        assert_eq!(provider.get_proficiency_level("anna", "fr").await.unwrap(), CefrLevel::A1);
    }

    #[tokio::test]
    async fn test_missing_profile_is_empty_at_default_level() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ProfileKnownWords::new(dir.path(), CefrLevel::B2);

        assert!(provider.get_known_words("nobody", "de").await.unwrap().is_empty());
        assert_eq!(provider.get_proficiency_level("nobody", "de").await.unwrap(), CefrLevel::B2);
    }

    #[tokio::test]
    async fn test_rejects_path_like_user_ids() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ProfileKnownWords::new(dir.path(), CefrLevel::A1);

        for user in ["../etc/passwd", "", ".hidden", "a/b"] {
            assert!(matches!(
                provider.get_known_words(user, "de").await,
                Err(KotobaError::KnownWords(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_mark_known_appends_new_words_only() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ProfileKnownWords::new(dir.path().join("learners"), CefrLevel::A1);

        assert_eq!(provider.mark_known("anna", "de", ["Hund", "der"]).await.unwrap(), 2);
        assert_eq!(provider.mark_known("anna", "de", ["hund", "schnell"]).await.unwrap(), 1);

        let known = provider.get_known_words("anna", "de").await.unwrap();
        assert_eq!(known.len(), 3);
        assert!(known.contains("Schnell"));
    }
}
