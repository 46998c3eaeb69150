use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscriberConfig;
use crate::error::{KotobaError, Result};
use crate::segment::{Segment, SegmentLoader};
use super::Transcriber;

/// JSON written by `whisper-cli -oj`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    #[serde(default)]
    pub result: Option<WhisperCppResult>,
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Segment bounds in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

impl WhisperCppOutput {
    /// Map whisper.cpp output to segments, dropping blank and zero-length ones.
    pub fn into_segments(self) -> Vec<Segment> {
        let segments = self
            .transcription
            .into_iter()
            .filter(|seg| !seg.text.trim().is_empty())
            .enumerate()
            .map(|(idx, seg)| {
                Segment::new(
                    idx as u32,
                    seg.text.trim(),
                    seg.offsets.from.max(0) as f64 / 1000.0,
                    seg.offsets.to.max(0) as f64 / 1000.0,
                )
            })
            .collect();
        SegmentLoader::renumber(SegmentLoader::retain_valid(segments))
    }
}

/// Transcriber that shells out to the whisper.cpp CLI.
pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: Option<&str>) -> Result<Vec<Segment>> {
        if !audio_path.exists() {
            return Err(KotobaError::NotFound(format!(
                "Audio chunk not found: {}",
                audio_path.display()
            )));
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| KotobaError::Transcription(format!("Failed to create temp dir: {}", e)))?;
        let output_base = temp_dir.path().join("transcript");
        let output_path = temp_dir.path().join("transcript.json");

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-oj")
            .arg("-of").arg(&output_base)
            .arg("-m").arg(&self.config.model_path)
            .arg("-t").arg(self.config.threads.to_string())
            .arg("-f").arg(audio_path)
            .kill_on_drop(true);

        if let Some(lang) = language {
            cmd.arg("-l").arg(lang);
        }

        info!("Transcribing {}", audio_path.display());
        debug!("Executing whisper command: {:?}", cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| KotobaError::Transcription(format!("Failed to execute whisper: {}", e)))?;

        debug!("Whisper exit status: {}", output.status);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KotobaError::Transcription(format!("Whisper failed: {}", stderr)));
        }

        let json_content = tokio::fs::read_to_string(&output_path)
            .await
            .map_err(|e| KotobaError::Transcription(format!("Failed to read transcription: {}", e)))?;

        let whisper_output: WhisperCppOutput = serde_json::from_str(&json_content)
            .map_err(|e| KotobaError::Transcription(format!("Failed to parse transcription JSON: {}", e)))?;

        if let Some(result) = &whisper_output.result {
            debug!("Whisper detected language: {}", result.language);
        }

        let segments = whisper_output.into_segments();
        info!("Transcribed {} segments", segments.len());
        Ok(segments)
    }
}
