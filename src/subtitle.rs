use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::classifier::{ClassifiedSegment, SegmentCategory};
use crate::error::Result;
use crate::filter::WordStatus;
use crate::pipeline::ChunkArtifact;

/// Output paths for a run: `<stem>.<lang>.srt` and `<stem>.<lang>.json`
/// next to the input file.
pub fn output_paths(input: &Path, language: &str) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let dir = input.parent().unwrap_or_else(|| Path::new(""));

    (
        dir.join(format!("{}.{}.srt", stem, language)),
        dir.join(format!("{}.{}.json", stem, language)),
    )
}

/// Render learner subtitles: unknown words underlined, and for blocker
/// lines the translation in italics underneath.
pub fn render_learner_srt(artifact: &ChunkArtifact) -> String {
    let mut srt_content = String::new();

    for (index, segment) in artifact.filtering.segments.iter().enumerate() {
        let mut text = annotate_line(segment);

        if segment.category == SegmentCategory::Blocker {
            if let Some(translation) = artifact.translation.translation_for(segment.segment.id) {
                if !translation.translated_text.trim().is_empty() {
                    text.push_str(&format!("\n<i>{}</i>", translation.translated_text.trim()));
                }
            }
        }

        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.segment.start),
            format_srt_time(segment.segment.end),
            text
        ));
    }

    srt_content
}

/// Segment text with every unknown word wrapped in `<u>…</u>`.
fn annotate_line(segment: &ClassifiedSegment) -> String {
    let text = segment.segment.text.as_str();
    if segment.category != SegmentCategory::Blocker {
        return text.trim().to_string();
    }

    let mut annotated = String::with_capacity(text.len() + 16);
    let mut cursor = 0;

    for word in segment.words.iter().filter(|w| w.status == WordStatus::Unknown) {
        let start = word.resolved.word.offset;
        let end = start + word.surface().len();
        if start < cursor || text.get(start..end) != Some(word.surface()) {
            continue;
        }
        annotated.push_str(&text[cursor..start]);
        annotated.push_str("<u>");
        annotated.push_str(&text[start..end]);
        annotated.push_str("</u>");
        cursor = end;
    }
    annotated.push_str(&text[cursor..]);

    annotated.trim().to_string()
}

pub async fn write_learner_srt<P: AsRef<Path>>(artifact: &ChunkArtifact, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating learner SRT file: {}", output_path.display());

    fs::write(output_path, render_learner_srt(artifact)).await?;

    info!("SRT file generated successfully");
    Ok(())
}

pub async fn write_artifact_json<P: AsRef<Path>>(artifact: &ChunkArtifact, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Writing chunk artifact: {}", output_path.display());

    let content = serde_json::to_string_pretty(artifact)?;
    fs::write(output_path, content).await?;
    Ok(())
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}
