//! Chunk job coordination.
//!
//! A chunk job moves through `pending → transcribing → filtering →
//! translating → complete`. Any stage error ends it in `error`; a cancelled
//! job ends in `cancelled` and produces no artifact. Transcription and
//! translation are never retried here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::{FilteringResult, SegmentClassifier};
use crate::config::{Config, PipelineConfig, TranslationScope};
use crate::error::{KotobaError, Result};
use crate::filter::{KnownWords, WordFilter, WordStatus};
use crate::language::LanguageRegistry;
use crate::learner::{KnownWordsProvider, ProfileKnownWords};
use crate::level::CefrLevel;
use crate::progress::{ProgressTracker, TaskStage, TaskSummary, new_task_id};
use crate::segment::{Segment, SegmentLoader, tokenize};
use crate::transcribe::{Transcriber, TranscriberFactory};
use crate::translate::{
    TranslationOutcome, TranslationRunner, TranslationSegment, TranslationSegmentBuilder, Translator,
    TranslatorFactory,
};
use crate::validator::WordValidator;
use crate::vocabulary::{MemoryVocabularyStore, ResolverStats, VocabularyResolver, VocabularyStore};

/// Where a chunk's segments come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkSource {
    /// Audio to be transcribed.
    Audio(PathBuf),
    /// Existing transcript (`.json` or `.srt`) with absolute timestamps.
    Transcript(PathBuf),
}

impl ChunkSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Audio(path) | Self::Transcript(path) => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub task_id: String,
    pub user_id: String,
    pub source: ChunkSource,
    pub source_language: String,
    pub target_language: String,
    /// Seconds added to transcriber timestamps to place the chunk on the media timeline.
    pub chunk_offset: f64,
    /// Words the learner picked up since the profile was read; applied in the refilter pass.
    pub learned_words: Option<KnownWords>,
}

impl ChunkJob {
    pub fn new(
        user_id: impl Into<String>,
        source: ChunkSource,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            task_id: new_task_id(),
            user_id: user_id.into(),
            source,
            source_language: source_language.into(),
            target_language: target_language.into(),
            chunk_offset: 0.0,
            learned_words: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.chunk_offset = offset;
        self
    }

    pub fn with_learned_words(mut self, words: KnownWords) -> Self {
        self.learned_words = Some(words);
        self
    }
}

/// One entry of the learner's study list for a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItem {
    pub surface: String,
    pub lemma: String,
    pub level: Option<CefrLevel>,
    pub first_seen: f64,
    pub occurrences: usize,
}

/// Everything a finished chunk job produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkArtifact {
    pub task_id: String,
    pub user_id: String,
    pub source_language: String,
    pub target_language: String,
    pub proficiency_level: CefrLevel,
    pub filtering: FilteringResult,
    pub translation_segments: Vec<TranslationSegment>,
    pub translation: TranslationOutcome,
    pub vocabulary: Vec<VocabularyItem>,
    pub resolver_stats: ResolverStats,
}

impl ChunkArtifact {
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            statistics: self.filtering.statistics,
            translation_segment_count: self.translation_segments.len(),
            translation_failed: self.translation.translation_failed,
        }
    }
}

/// Distinct unknown words keyed by lowercase lemma, in order of first appearance.
fn study_list(result: &FilteringResult) -> Vec<VocabularyItem> {
    let mut items: Vec<VocabularyItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for word in result
        .segments
        .iter()
        .flat_map(|s| s.words.iter())
        .filter(|w| w.status == WordStatus::Unknown)
    {
        let key = word.resolved.lemma.to_lowercase();
        match index.get(&key) {
            Some(&idx) => items[idx].occurrences += 1,
            None => {
                index.insert(key, items.len());
                items.push(VocabularyItem {
                    surface: word.surface().to_string(),
                    lemma: word.resolved.lemma.clone(),
                    level: word.resolved.difficulty_level,
                    first_seen: word.resolved.word.start,
                    occurrences: 1,
                });
            }
        }
    }

    items
}

/// Distinct known surfaces in order of first appearance.
fn known_surfaces(result: &FilteringResult) -> Vec<String> {
    let mut seen = BTreeSet::new();
    result
        .segments
        .iter()
        .flat_map(|s| s.words.iter())
        .filter(|w| w.status == WordStatus::Known)
        .filter(|w| seen.insert(w.surface().to_lowercase()))
        .map(|w| w.surface().to_string())
        .collect()
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(KotobaError::Cancelled)
    } else {
        Ok(())
    }
}

pub struct ChunkPipelineCoordinator {
    transcriber: Arc<dyn Transcriber>,
    translator: Option<Arc<dyn Translator>>,
    store: Arc<dyn VocabularyStore>,
    known_words: Arc<dyn KnownWordsProvider>,
    languages: Arc<LanguageRegistry>,
    tracker: ProgressTracker,
    settings: PipelineConfig,
    scope: TranslationScope,
}

impl ChunkPipelineCoordinator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn VocabularyStore>,
        known_words: Arc<dyn KnownWordsProvider>,
        languages: Arc<LanguageRegistry>,
        tracker: ProgressTracker,
    ) -> Self {
        Self {
            transcriber,
            translator: None,
            store,
            known_words,
            languages,
            tracker,
            settings: PipelineConfig::default(),
            scope: TranslationScope::Segment,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_settings(mut self, settings: PipelineConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_scope(mut self, scope: TranslationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Wire up the shipped collaborators from configuration.
    pub async fn from_config(config: &Config, tracker: ProgressTracker) -> Result<Self> {
        let languages = Arc::new(LanguageRegistry::load(config.vocabulary.languages_path.as_deref())?);

        let store = match MemoryVocabularyStore::from_file(&config.vocabulary.store_path).await {
            Ok(store) => store,
            Err(KotobaError::NotFound(path)) => {
                warn!(
                    "Vocabulary store {} not found; every word will be resolved heuristically",
                    path
                );
                MemoryVocabularyStore::new()
            }
            Err(e) => return Err(e),
        };

        let known_words = ProfileKnownWords::new(&config.learner.profiles_dir, config.learner.default_level);

        let mut coordinator = Self::new(
            TranscriberFactory::create_default(config.transcriber.clone()),
            Arc::new(store),
            Arc::new(known_words),
            languages,
            tracker,
        )
        .with_settings(config.pipeline.clone())
        .with_scope(config.translate.scope);

        if let Some(translator) = TranslatorFactory::create_translator(&config.translate)? {
            coordinator = coordinator.with_translator(translator);
        }

        Ok(coordinator)
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Run one chunk job to a terminal state and record it in the tracker.
    pub async fn run(&self, job: ChunkJob, cancel: CancellationToken) -> Result<ChunkArtifact> {
        self.tracker.init(&job.task_id).await;
        info!("Chunk job {} started for learner '{}'", job.task_id, job.user_id);

        match self.execute(&job, &cancel).await {
            Ok(artifact) => {
                self.tracker.complete(&job.task_id, artifact.summary()).await;
                info!(
                    "Chunk job {} complete: {} blocker segments, {} unknown words",
                    job.task_id,
                    artifact.filtering.statistics.blocker_segment_count,
                    artifact.vocabulary.len()
                );
                Ok(artifact)
            }
            Err(KotobaError::Cancelled) => {
                self.tracker.cancel(&job.task_id).await;
                info!("Chunk job {} cancelled", job.task_id);
                Err(KotobaError::Cancelled)
            }
            Err(e) => {
                self.tracker.fail(&job.task_id, &e.to_string()).await;
                error!("Chunk job {} failed: {}", job.task_id, e);
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &ChunkJob, cancel: &CancellationToken) -> Result<ChunkArtifact> {
        checkpoint(cancel)?;

        // Stage 1: segments
        let segments = self.acquire_segments(job).await?;
        checkpoint(cancel)?;

        // Stage 2: filtering
        self.tracker
            .update(&job.task_id, 40.0, TaskStage::Filtering, "Loading learner profile")
            .await;
        let known = self
            .known_words
            .get_known_words(&job.user_id, &job.source_language)
            .await?;
        let level = self
            .known_words
            .get_proficiency_level(&job.user_id, &job.source_language)
            .await?;
        debug!("Learner '{}': {} known words, level {}", job.user_id, known.len(), level);

        let (first_pass, resolver_stats) = self
            .filter_segments(job, segments, &known, level, cancel)
            .await?;
        checkpoint(cancel)?;

        // Stage 3: translating
        self.tracker
            .update(&job.task_id, 75.0, TaskStage::Translating, "Building translation request")
            .await;
        let builder = TranslationSegmentBuilder::new(level);
        let updated_known = job.learned_words.as_ref().map(|learned| known.merged(learned));
        let translation_segments = builder.build(&first_pass, updated_known.as_ref());
        let filtering = match &updated_known {
            Some(updated) => builder.refilter(&first_pass, updated),
            None => first_pass,
        };
        let known_list = known_surfaces(&filtering);

        let translation = match &self.translator {
            Some(translator) => {
                self.tracker
                    .update(
                        &job.task_id,
                        80.0,
                        TaskStage::Translating,
                        &format!("Translating {} segments", translation_segments.len()),
                    )
                    .await;
                TranslationRunner::new(translator.clone(), self.scope, self.settings.translation_timeout())
                    .run(
                        &translation_segments,
                        &job.source_language,
                        &job.target_language,
                        known_list,
                        cancel,
                    )
                    .await?
            }
            None => {
                debug!("Translation disabled");
                TranslationOutcome::skipped(known_list)
            }
        };
        // A translation that finished after cancellation is discarded
        checkpoint(cancel)?;

        Ok(ChunkArtifact {
            task_id: job.task_id.clone(),
            user_id: job.user_id.clone(),
            source_language: job.source_language.clone(),
            target_language: job.target_language.clone(),
            proficiency_level: level,
            vocabulary: study_list(&filtering),
            filtering,
            translation_segments,
            translation,
            resolver_stats,
        })
    }

    async fn acquire_segments(&self, job: &ChunkJob) -> Result<Vec<Segment>> {
        match &job.source {
            ChunkSource::Transcript(path) => {
                self.tracker
                    .update(&job.task_id, 5.0, TaskStage::Transcribing, "Loading transcript")
                    .await;
                SegmentLoader::load(path).await
            }
            ChunkSource::Audio(path) => {
                if tokio::fs::metadata(path).await.is_err() {
                    return Err(KotobaError::NotFound(format!("Audio chunk not found: {}", path.display())));
                }

                self.tracker
                    .update(&job.task_id, 5.0, TaskStage::Transcribing, "Transcribing audio")
                    .await;
                let timeout = self.settings.transcription_timeout();
                let segments = tokio::time::timeout(
                    timeout,
                    self.transcriber.transcribe(path, Some(&job.source_language)),
                )
                .await
                .map_err(|_| KotobaError::Timeout(format!("transcription after {:?}", timeout)))??;

                // Ids from a transcriber are not trusted to be unique
                Ok(SegmentLoader::renumber(
                    segments
                        .into_iter()
                        .map(|segment| segment.shifted(job.chunk_offset))
                        .collect(),
                ))
            }
        }
    }

    async fn filter_segments(
        &self,
        job: &ChunkJob,
        segments: Vec<Segment>,
        known: &KnownWords,
        level: CefrLevel,
        cancel: &CancellationToken,
    ) -> Result<(FilteringResult, ResolverStats)> {
        // Fresh caches per job
        let mut resolver = VocabularyResolver::new(self.store.clone(), self.languages.clone())
            .with_lookup_timeout(self.settings.lookup_timeout());
        let validator = WordValidator::new(self.languages.clone());
        let language = job.source_language.as_str();
        let total = segments.len();

        let mut classified = Vec::with_capacity(total);
        for (idx, segment) in segments.into_iter().enumerate() {
            checkpoint(cancel)?;

            let mut words = Vec::new();
            for word in tokenize(&segment) {
                let validation = validator.is_vocabulary_candidate(&word, language);
                let resolved = resolver.resolve_word(&word, validation, language).await;
                words.push(WordFilter::apply(resolved, known, level));
            }
            classified.push(SegmentClassifier::classify(segment, words));

            let progress = 40.0 + 35.0 * (idx + 1) as f64 / total as f64;
            self.tracker
                .update(
                    &job.task_id,
                    progress,
                    TaskStage::Filtering,
                    &format!("Filtered {}/{} segments", idx + 1, total),
                )
                .await;
        }

        resolver.log_summary();
        let result = FilteringResult::from_segments(classified);
        info!(
            "Filtering: {} words, {} known, {} unknown, {} skipped; {} blocker / {} clear / {} empty segments",
            result.statistics.total_words,
            result.statistics.known_count,
            result.statistics.unknown_count,
            result.statistics.skipped_count,
            result.statistics.blocker_segment_count,
            result.statistics.clear_segment_count,
            result.statistics.empty_segment_count
        );
        Ok((result, resolver.stats()))
    }
}

/// Handle to a job started by [`ChunkScheduler::spawn`].
pub struct ScheduledJob {
    pub task_id: String,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<ChunkArtifact>>,
}

impl ScheduledJob {
    pub async fn join(self) -> Result<ChunkArtifact> {
        self.handle
            .await
            .map_err(|e| KotobaError::Task(format!("chunk job {} aborted: {}", self.task_id, e)))?
    }
}

/// Runs chunk jobs concurrently, at most `max_concurrent_jobs` at a time.
pub struct ChunkScheduler {
    coordinator: Arc<ChunkPipelineCoordinator>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl ChunkScheduler {
    pub fn new(coordinator: Arc<ChunkPipelineCoordinator>, max_concurrent_jobs: usize) -> Self {
        Self {
            coordinator,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        self.coordinator.tracker()
    }

    /// Cancel every queued and running job.
    pub fn cancel_all(&self) {
        info!("Cancelling all chunk jobs");
        self.shutdown.cancel();
    }

    /// Queue a job. It shows up as `pending` in the tracker right away.
    pub async fn spawn(&self, job: ChunkJob) -> ScheduledJob {
        let task_id = job.task_id.clone();
        let cancel = self.shutdown.child_token();
        self.tracker().init(&task_id).await;

        let coordinator = self.coordinator.clone();
        let semaphore = self.semaphore.clone();
        let token = cancel.clone();
        let id = task_id.clone();

        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.map_err(|_| KotobaError::Cancelled)?,
                _ = token.cancelled() => {
                    coordinator.tracker().cancel(&id).await;
                    return Err(KotobaError::Cancelled);
                }
            };
            debug!("Chunk job {} acquired a worker slot", id);
            coordinator.run(job, token).await
        });

        ScheduledJob {
            task_id,
            cancel,
            handle,
        }
    }

    /// Run all jobs and return their results in submission order.
    pub async fn run_all(&self, jobs: Vec<ChunkJob>) -> Vec<(String, Result<ChunkArtifact>)> {
        let mut scheduled = Vec::with_capacity(jobs.len());
        for job in jobs {
            scheduled.push(self.spawn(job).await);
        }

        let mut results = Vec::with_capacity(scheduled.len());
        for job in scheduled {
            let task_id = job.task_id.clone();
            results.push((task_id, job.join().await));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::SegmentCategory;
    use crate::learner::InMemoryKnownWords;
    use crate::test_support::{
        CountingStore, ScriptedTranslator, StaticTranscriber, TranslatorBehavior, german_store,
    };
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        audio: PathBuf,
        transcript: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("chunk-0001.wav");
        std::fs::write(&audio, b"RIFF").unwrap();
        let transcript = dir.path().join("chunk-0001.json");
        std::fs::write(
            &transcript,
            r#"[{"text": "Der Hund läuft schnell.", "start": 0.0, "end": 2.0}]"#,
        )
        .unwrap();
        Fixture {
            _dir: dir,
            audio,
            transcript,
        }
    }

    fn learners() -> Arc<InMemoryKnownWords> {
        Arc::new(InMemoryKnownWords::new(CefrLevel::A1).with_words("anna", "de", ["der", "laufen"]))
    }

    fn coordinator_with(
        transcriber: Arc<StaticTranscriber>,
        store: Arc<CountingStore>,
    ) -> ChunkPipelineCoordinator {
        ChunkPipelineCoordinator::new(
            transcriber,
            store,
            learners(),
            Arc::new(LanguageRegistry::builtin().unwrap()),
            ProgressTracker::new(),
        )
    }

    fn dog_segment() -> Vec<Segment> {
        vec![Segment::new(0, "Der Hund läuft schnell.", 0.0, 2.0)]
    }

    #[tokio::test]
    async fn test_german_sentence_end_to_end() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()));
        let translator = Arc::new(ScriptedTranslator::new(TranslatorBehavior::Echo));
        let coordinator = coordinator_with(transcriber.clone(), Arc::new(german_store()))
            .with_translator(translator.clone());

        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_task_id("job-1");
        let artifact = coordinator.run(job, CancellationToken::new()).await.unwrap();

        let segment = &artifact.filtering.segments[0];
        let statuses: Vec<(&str, WordStatus)> = segment.words.iter().map(|w| (w.surface(), w.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("Der", WordStatus::Known),
                ("Hund", WordStatus::Unknown),
                ("läuft", WordStatus::Known),
                ("schnell", WordStatus::Unknown),
            ]
        );
        assert_eq!(segment.category, SegmentCategory::Blocker);
        assert_eq!(artifact.translation_segments.len(), 1);
        assert_eq!(artifact.translation_segments[0].unknown_words, vec!["Hund", "schnell"]);

        assert!(!artifact.translation.translation_failed);
        assert_eq!(translator.requests(), vec!["Der Hund läuft schnell."]);
        assert_eq!(artifact.translation.known_words, vec!["Der", "läuft"]);

        let lemmas: Vec<&str> = artifact.vocabulary.iter().map(|v| v.lemma.as_str()).collect();
        assert_eq!(lemmas, vec!["Hund", "schnell"]);
        assert_eq!(artifact.vocabulary[0].level, Some(CefrLevel::B1));

        let task = coordinator.tracker().get("job-1").await.unwrap();
        assert_eq!(task.stage, TaskStage::Complete);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.result.unwrap().statistics.unknown_count, 2);
        assert_eq!(transcriber.calls(), 1);
    }

    #[tokio::test]
    async fn test_learned_words_shrink_translation_request() {
        let fx = fixture();
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(dog_segment())), Arc::new(german_store()));

        let learned: KnownWords = ["hund"].into_iter().collect();
        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_learned_words(learned);
        let artifact = coordinator.run(job, CancellationToken::new()).await.unwrap();

        assert_eq!(artifact.translation_segments.len(), 1);
        assert_eq!(artifact.translation_segments[0].unknown_words, vec!["schnell"]);
        assert_eq!(artifact.filtering.statistics.unknown_count, 1);
        assert_eq!(artifact.vocabulary.len(), 1);
    }

    #[tokio::test]
    async fn test_transcript_source_and_determinism() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(Vec::new()));
        let coordinator = coordinator_with(transcriber.clone(), Arc::new(german_store()));

        let first = coordinator
            .run(
                ChunkJob::new("anna", ChunkSource::Transcript(fx.transcript.clone()), "de", "en"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let second = coordinator
            .run(
                ChunkJob::new("anna", ChunkSource::Transcript(fx.transcript.clone()), "de", "en"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(first.filtering, second.filtering);
        assert_eq!(first.filtering.statistics.blocker_segment_count, 1);
        assert_eq!(transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_chunk_offset_shifts_timestamps() {
        let fx = fixture();
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(dog_segment())), Arc::new(german_store()));

        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_offset(30.0);
        let artifact = coordinator.run(job, CancellationToken::new()).await.unwrap();

        let segment = &artifact.filtering.segments[0];
        assert_eq!(segment.segment.start, 30.0);
        assert_eq!(segment.segment.end, 32.0);
        assert_eq!(segment.words[0].resolved.word.start, 30.0);
        assert_eq!(artifact.vocabulary[0].first_seen, 30.5);
    }

    #[tokio::test]
    async fn test_translation_failure_is_partial_result() {
        let fx = fixture();
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(dog_segment())), Arc::new(german_store()))
            .with_translator(Arc::new(ScriptedTranslator::new(TranslatorBehavior::Fail)));

        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_task_id("job-tr");
        let artifact = coordinator.run(job, CancellationToken::new()).await.unwrap();

        assert!(artifact.translation.translation_failed);
        assert!(artifact.translation.translations.is_empty());
        assert_eq!(artifact.translation.known_words, vec!["Der", "läuft"]);
        assert_eq!(artifact.filtering.statistics.unknown_count, 2);

        let task = coordinator.tracker().get("job-tr").await.unwrap();
        assert_eq!(task.stage, TaskStage::Complete);
        assert!(task.result.unwrap().translation_failed);
    }

    #[tokio::test]
    async fn test_lookup_failures_do_not_abort() {
        let fx = fixture();
        let store = Arc::new(german_store().failing_on("Hund"));
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(dog_segment())), store);

        let artifact = coordinator
            .run(
                ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let hund = &artifact.filtering.segments[0].words[1];
        assert_eq!(hund.status, WordStatus::Unknown);
        assert_eq!(hund.resolved.difficulty_level, None);
        assert_eq!(artifact.resolver_stats.failures, 1);
    }

    #[tokio::test]
    async fn test_missing_input_fails_fast() {
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()));
        let coordinator = coordinator_with(transcriber.clone(), Arc::new(german_store()));

        let job = ChunkJob::new("anna", ChunkSource::Audio(PathBuf::from("/nonexistent/chunk.wav")), "de", "en")
            .with_task_id("job-missing");
        let result = coordinator.run(job, CancellationToken::new()).await;

        assert!(matches!(result, Err(KotobaError::NotFound(_))));
        assert_eq!(transcriber.calls(), 0);
        assert_eq!(coordinator.tracker().get("job-missing").await.unwrap().stage, TaskStage::Error);

        let job = ChunkJob::new("anna", ChunkSource::Transcript(PathBuf::from("/nonexistent/chunk.srt")), "de", "en");
        assert!(matches!(
            coordinator.run(job, CancellationToken::new()).await,
            Err(KotobaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transcription_error_is_terminal() {
        let fx = fixture();
        let translator = Arc::new(ScriptedTranslator::new(TranslatorBehavior::Echo));
        let transcriber = Arc::new(StaticTranscriber::failing());
        let coordinator =
            coordinator_with(transcriber.clone(), Arc::new(german_store())).with_translator(translator.clone());

        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_task_id("job-err");
        let result = coordinator.run(job, CancellationToken::new()).await;

        assert!(matches!(result, Err(KotobaError::Transcription(_))));
        assert_eq!(transcriber.calls(), 1);
        assert_eq!(translator.calls(), 0);

        let task = coordinator.tracker().get("job-err").await.unwrap();
        assert_eq!(task.stage, TaskStage::Error);
        assert!(task.error.unwrap().contains("model crashed"));
    }

    #[tokio::test]
    async fn test_transcription_timeout() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()).delayed(Duration::from_secs(5)));
        let settings = PipelineConfig {
            transcription_timeout_secs: 1,
            ..PipelineConfig::default()
        };
        let coordinator = coordinator_with(transcriber, Arc::new(german_store())).with_settings(settings);

        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en");
        let result = coordinator.run(job, CancellationToken::new()).await;
        assert!(matches!(result, Err(KotobaError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()));
        let coordinator = coordinator_with(transcriber.clone(), Arc::new(german_store()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_task_id("job-c");
        let result = coordinator.run(job, cancel).await;

        assert!(result.as_ref().is_err_and(|e| e.is_cancelled()));
        assert_eq!(transcriber.calls(), 0);
        let task = coordinator.tracker().get("job-c").await.unwrap();
        assert_eq!(task.stage, TaskStage::Cancelled);
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_transcription_discards_result() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()).delayed(Duration::from_millis(200)));
        let translator = Arc::new(ScriptedTranslator::new(TranslatorBehavior::Echo));
        let coordinator = Arc::new(
            coordinator_with(transcriber.clone(), Arc::new(german_store())).with_translator(translator.clone()),
        );

        let cancel = CancellationToken::new();
        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_task_id("job-mid");
        let running = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.run(job, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = running.await.unwrap();

        assert!(matches!(result, Err(KotobaError::Cancelled)));
        // The in-flight call was allowed to finish
        assert_eq!(transcriber.calls(), 1);
        assert_eq!(translator.calls(), 0);
        assert_eq!(
            coordinator.tracker().get("job-mid").await.unwrap().stage,
            TaskStage::Cancelled
        );
    }

    #[tokio::test]
    async fn test_scheduler_respects_concurrency_limit() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()).delayed(Duration::from_millis(50)));
        let coordinator = Arc::new(coordinator_with(transcriber.clone(), Arc::new(german_store())));
        let scheduler = ChunkScheduler::new(coordinator, 2);

        let jobs: Vec<ChunkJob> = (0..6)
            .map(|i| {
                ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en")
                    .with_task_id(format!("job-{}", i))
                    .with_offset(i as f64 * 30.0)
            })
            .collect();
        let results = scheduler.run_all(jobs).await;

        assert_eq!(results.len(), 6);
        for (i, (task_id, result)) in results.iter().enumerate() {
            assert_eq!(task_id, &format!("job-{}", i));
            let artifact = result.as_ref().unwrap();
            assert_eq!(artifact.filtering.segments[0].segment.start, i as f64 * 30.0);
        }
        assert_eq!(transcriber.calls(), 6);
        assert!(transcriber.peak_concurrency() <= 2);
        assert!(
            scheduler
                .tracker()
                .snapshot()
                .await
                .iter()
                .all(|t| t.stage == TaskStage::Complete)
        );
    }

    #[tokio::test]
    async fn test_scheduler_cancel_all() {
        let fx = fixture();
        let transcriber = Arc::new(StaticTranscriber::new(dog_segment()).delayed(Duration::from_millis(100)));
        let coordinator = Arc::new(coordinator_with(transcriber.clone(), Arc::new(german_store())));
        let scheduler = ChunkScheduler::new(coordinator, 1);

        let mut scheduled = Vec::new();
        for i in 0..3 {
            let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en")
                .with_task_id(format!("job-{}", i));
            scheduled.push(scheduler.spawn(job).await);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.cancel_all();

        for job in scheduled {
            assert!(job.join().await.is_err_and(|e| e.is_cancelled()));
        }
        // Only the job holding the single slot reached the transcriber
        assert!(transcriber.calls() <= 1);
        assert!(
            scheduler
                .tracker()
                .snapshot()
                .await
                .iter()
                .all(|t| t.stage == TaskStage::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_each_job_gets_fresh_caches() {
        let fx = fixture();
        let store = Arc::new(german_store());
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(dog_segment())), store.clone());

        for _ in 0..2 {
            coordinator
                .run(
                    ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en"),
                    CancellationToken::new(),
                )
                .await
                .unwrap();
        }

        assert_eq!(store.calls_for("Hund", "de"), 2);
    }

    #[tokio::test]
    async fn test_translations_attach_to_their_own_lines() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("chunk.json");
        std::fs::write(
            &transcript,
            r#"[{"id": 1, "text": "Der Hund.", "start": 0.0, "end": 1.0},
                {"text": "Das Fenster.", "start": 1.0, "end": 2.0}]"#,
        )
        .unwrap();

        let translator = Arc::new(ScriptedTranslator::new(TranslatorBehavior::Echo));
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(Vec::new())), Arc::new(german_store()))
            .with_translator(translator);

        let job = ChunkJob::new("anna", ChunkSource::Transcript(transcript), "de", "en");
        let artifact = coordinator.run(job, CancellationToken::new()).await.unwrap();

        let ids: Vec<u32> = artifact.filtering.segments.iter().map(|s| s.segment.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(
            artifact.translation.translation_for(1).unwrap().translated_text,
            "[en] Das Fenster."
        );

        let srt = crate::subtitle::render_learner_srt(&artifact);
        assert!(srt.contains("Das <u>Fenster</u>.\n<i>[en] Das Fenster.</i>"));
        assert!(srt.contains("Der <u>Hund</u>.\n<i>[en] Der Hund.</i>"));
    }

    #[tokio::test]
    async fn test_transcriber_ids_are_renumbered() {
        let fx = fixture();
        let segments = vec![
            Segment::new(4, "Der Hund.", 0.0, 1.0),
            Segment::new(4, "Der Hund läuft.", 1.0, 2.0),
        ];
        let coordinator = coordinator_with(Arc::new(StaticTranscriber::new(segments)), Arc::new(german_store()));

        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en");
        let artifact = coordinator.run(job, CancellationToken::new()).await.unwrap();

        let ids: Vec<u32> = artifact.translation_segments.iter().map(|t| t.segment_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_cancel_during_translation_stops_remaining_calls() {
        let fx = fixture();
        let segments: Vec<Segment> = (0..10)
            .map(|i| Segment::new(i, "Der Hund läuft schnell.", i as f64, i as f64 + 1.0))
            .collect();
        let translator = Arc::new(ScriptedTranslator::new(TranslatorBehavior::Delay(Duration::from_millis(50))));
        let coordinator = Arc::new(
            coordinator_with(Arc::new(StaticTranscriber::new(segments)), Arc::new(german_store()))
                .with_translator(translator.clone()),
        );

        let cancel = CancellationToken::new();
        let job = ChunkJob::new("anna", ChunkSource::Audio(fx.audio.clone()), "de", "en").with_task_id("job-tr");
        let running = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coordinator.run(job, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        let result = running.await.unwrap();

        assert!(matches!(result, Err(KotobaError::Cancelled)));
        assert!(translator.calls() < 10);
        assert!(translator.calls() <= 3, "calls after cancel: {}", translator.calls());
        assert_eq!(
            coordinator.tracker().get("job-tr").await.unwrap().stage,
            TaskStage::Cancelled
        );
    }
}
