use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{KotobaError, Result};
use crate::pipeline::{ChunkArtifact, ChunkJob, ChunkPipelineCoordinator, ChunkScheduler, ChunkSource};
use crate::progress::ProgressTracker;
use crate::subtitle::{output_paths, write_artifact_json, write_learner_srt};
use crate::translate::OllamaTranslator;

const TRANSCRIPT_EXTENSIONS: [&str; 2] = ["json", "srt"];
const AUDIO_EXTENSIONS: [&str; 5] = ["wav", "mp3", "flac", "ogg", "m4a"];
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of a directory run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub cancelled: Vec<PathBuf>,
}

pub struct Workflow {
    config: Config,
    coordinator: Arc<ChunkPipelineCoordinator>,
}

impl Workflow {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        if config.translate.enabled {
            // Not fatal: an unreachable translator only costs the translation stage
            let translator = OllamaTranslator::new(config.translate.clone())?;
            if let Err(e) = translator.check_availability().await {
                warn!("{}; blocker lines will stay untranslated", e);
            }
        }

        let coordinator = ChunkPipelineCoordinator::from_config(&config, ProgressTracker::new()).await?;
        Ok(Self::with_coordinator(config, coordinator))
    }

    pub fn with_coordinator(config: Config, coordinator: ChunkPipelineCoordinator) -> Self {
        Self {
            config,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Run one chunk job and write its subtitle and artifact files.
    pub async fn process_single_file(&self, job: ChunkJob, output_dir: Option<&Path>) -> Result<ChunkArtifact> {
        let input_path = job.source.path().to_path_buf();
        info!("Processing single file: {}", input_path.display());

        let token = CancellationToken::new();
        let watcher = cancel_on_ctrl_c(token.clone());
        let result = self.coordinator.run(job, token).await;
        watcher.abort();

        let artifact = result?;
        self.write_outputs(&artifact, &input_path, output_dir).await?;
        Ok(artifact)
    }

    /// Run every transcript and audio chunk under `input_dir` concurrently.
    pub async fn process_directory(
        &self,
        input_dir: &Path,
        user_id: &str,
        source_language: &str,
        target_language: &str,
        output_dir: Option<&Path>,
    ) -> Result<BatchReport> {
        info!("Processing directory: {}", input_dir.display());

        let sources = discover_chunks(input_dir, target_language)?;
        if sources.is_empty() {
            warn!("No transcripts or audio chunks found in {}", input_dir.display());
            return Ok(BatchReport::default());
        }
        info!("Found {} chunks to process", sources.len());

        let scheduler = ChunkScheduler::new(self.coordinator.clone(), self.config.pipeline.max_concurrent_jobs);
        let multi = MultiProgress::new();
        let style = progress_style();

        let mut running = Vec::with_capacity(sources.len());
        for source in sources {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(display_name(source.path()));

            let job = ChunkJob::new(user_id, source.clone(), source_language, target_language);
            let scheduled = scheduler.spawn(job).await;
            running.push((source, bar, scheduled));
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupted = false;

        loop {
            for (_, bar, job) in &running {
                if let Some(task) = scheduler.tracker().get(&job.task_id).await {
                    bar.set_position(task.progress as u64);
                    bar.set_message(task.stage.to_string());
                }
            }
            if running.iter().all(|(_, _, job)| job.handle.is_finished()) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(PROGRESS_POLL_INTERVAL) => {}
                _ = &mut ctrl_c, if !interrupted => {
                    warn!("Interrupted, cancelling remaining chunks");
                    scheduler.cancel_all();
                    interrupted = true;
                }
            }
        }

        let mut report = BatchReport::default();
        for (source, bar, job) in running {
            let path = source.path().to_path_buf();
            match job.join().await {
                Ok(artifact) => match self.write_outputs(&artifact, &path, output_dir).await {
                    Ok(_) => {
                        bar.finish_with_message("complete");
                        report.completed.push(path);
                    }
                    Err(e) => {
                        bar.abandon_with_message("write failed");
                        warn!("Failed to write outputs for {}: {}", path.display(), e);
                        report.failed.push((path, e.to_string()));
                    }
                },
                Err(e) if e.is_cancelled() => {
                    bar.abandon_with_message("cancelled");
                    report.cancelled.push(path);
                }
                Err(e) => {
                    bar.abandon_with_message("error");
                    warn!("Failed to process {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        info!(
            "Batch finished: {} complete, {} failed, {} cancelled",
            report.completed.len(),
            report.failed.len(),
            report.cancelled.len()
        );
        Ok(report)
    }

    /// Write `<stem>.<lang>.srt` and `<stem>.<lang>.json`, next to the input
    /// unless an output directory is given.
    pub async fn write_outputs(
        &self,
        artifact: &ChunkArtifact,
        input_path: &Path,
        output_dir: Option<&Path>,
    ) -> Result<(PathBuf, PathBuf)> {
        let (mut srt_path, mut json_path) = output_paths(input_path, &artifact.target_language);

        if let Some(dir) = output_dir {
            fs::create_dir_all(dir).await?;
            srt_path = relocate(&srt_path, dir)?;
            json_path = relocate(&json_path, dir)?;
        }

        write_learner_srt(artifact, &srt_path).await?;
        write_artifact_json(artifact, &json_path).await?;
        Ok((srt_path, json_path))
    }
}

/// Transcripts and audio chunks under `input_dir`, sorted by path. Files this
/// tool wrote for `target_language` are skipped.
pub fn discover_chunks(input_dir: &Path, target_language: &str) -> Result<Vec<ChunkSource>> {
    if !input_dir.is_dir() {
        return Err(KotobaError::Config(format!(
            "Input path is not a directory: {}",
            input_dir.display()
        )));
    }

    let output_suffix = format!(".{}", target_language.to_lowercase());
    let mut sources: Vec<ChunkSource> = Vec::new();
    // (directory, stem) -> index into sources; one chunk per stem
    let mut seen: HashMap<(PathBuf, String), usize> = HashMap::new();

    for entry in WalkDir::new(input_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(extension) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            continue;
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let source = if TRANSCRIPT_EXTENSIONS.contains(&extension.as_str()) {
            if stem.ends_with(&output_suffix) || has_language_suffix(&stem) {
                debug!("Skipping output artifact {}", path.display());
                continue;
            }
            ChunkSource::Transcript(path.to_path_buf())
        } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            ChunkSource::Audio(path.to_path_buf())
        } else {
            continue;
        };

        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        match seen.get(&(parent.clone(), stem.clone())) {
            Some(&index) => {
                // A transcript saves transcribing the audio of the same chunk
                if matches!(sources[index], ChunkSource::Audio(_)) && matches!(source, ChunkSource::Transcript(_)) {
                    debug!("Using transcript {} instead of audio", path.display());
                    sources[index] = source;
                } else {
                    debug!("Skipping duplicate chunk {}", path.display());
                }
            }
            None => {
                seen.insert((parent, stem), sources.len());
                sources.push(source);
            }
        }
    }

    Ok(sources)
}

/// Whether a stem ends in a language code such as `.en` or `.pt-br`, the
/// naming used for written subtitle and artifact files.
fn has_language_suffix(stem: &str) -> bool {
    let Some((base, suffix)) = stem.rsplit_once('.') else {
        return false;
    };
    if base.is_empty() {
        return false;
    }
    let (language, region) = match suffix.split_once('-') {
        Some((language, region)) => (language, Some(region)),
        None => (suffix, None),
    };
    let language_ok = (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_alphabetic());
    let region_ok = region.is_none_or(|r| (2..=4).contains(&r.len()) && r.chars().all(|c| c.is_ascii_alphanumeric()));
    language_ok && region_ok
}

fn relocate(path: &Path, dir: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| KotobaError::Config(format!("Invalid output path: {}", path.display())))?;
    Ok(dir.join(file_name))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:<24} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    })
}
