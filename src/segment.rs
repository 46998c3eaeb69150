//! Transcript segments and word tokenization.
//!
//! Word timing is an approximation: a segment's duration is split evenly
//! across its tokens. No forced alignment is performed, so per-word times
//! are only as good as the segment boundaries they are derived from.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{KotobaError, Result};

/// A contiguous span of speech with absolute timestamps in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(id: u32, text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            id,
            text: text.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Move chunk-relative timestamps onto the media timeline.
    pub fn shifted(mut self, offset: f64) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

/// A token with interpolated timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub surface: String,
    pub start: f64,
    pub end: f64,
    pub segment_id: u32,
    /// Position of the token within its segment.
    pub index: usize,
    /// Byte offset of the token in the segment text.
    pub offset: usize,
    /// First word of a sentence (Unicode sentence boundaries).
    pub sentence_initial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Json,
    Srt,
}

impl TranscriptFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "json" => Ok(Self::Json),
            "srt" => Ok(Self::Srt),
            other => Err(KotobaError::InvalidTranscript(format!(
                "Unsupported transcript extension '{}' for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Source ids, if any, are ignored: they are not guaranteed unique.
#[derive(Debug, Deserialize)]
struct RawSegment {
    text: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTranscript {
    Bare(Vec<RawSegment>),
    Wrapped { segments: Vec<RawSegment> },
}

pub struct SegmentLoader;

impl SegmentLoader {
    /// Load segments from a transcript file (`.json` or `.srt`).
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Segment>> {
        let path = path.as_ref();
        info!("Loading transcript: {}", path.display());

        let format = TranscriptFormat::from_path(path)?;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KotobaError::NotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(KotobaError::NotFound(format!(
                    "{} is unreadable: {}",
                    path.display(),
                    e
                )));
            }
        };

        let segments = Self::parse(&content, format)?;
        info!("Loaded {} segments", segments.len());
        Ok(segments)
    }

    pub fn parse(content: &str, format: TranscriptFormat) -> Result<Vec<Segment>> {
        match format {
            TranscriptFormat::Json => Self::parse_json(content),
            TranscriptFormat::Srt => Self::parse_srt(content),
        }
    }

    fn parse_json(content: &str) -> Result<Vec<Segment>> {
        let raw: RawTranscript = serde_json::from_str(content)
            .map_err(|e| KotobaError::InvalidTranscript(format!("Failed to parse JSON transcript: {}", e)))?;

        let raw_segments = match raw {
            RawTranscript::Bare(segments) => segments,
            RawTranscript::Wrapped { segments } => segments,
        };

        let segments = raw_segments
            .into_iter()
            .enumerate()
            .map(|(idx, seg)| Segment::new(idx as u32, seg.text.trim(), seg.start, seg.end))
            .collect();

        Ok(Self::renumber(Self::retain_valid(segments)))
    }

    fn parse_srt(content: &str) -> Result<Vec<Segment>> {
        let normalized = content.replace("\r\n", "\n");
        let mut segments = Vec::new();

        for block in normalized.split("\n\n") {
            let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());

            let Some(first) = lines.next() else {
                continue;
            };

            // The numeric index line is optional in the wild
            let timing = if first.contains("-->") {
                first
            } else {
                match lines.next() {
                    Some(line) => line,
                    None => continue,
                }
            };

            let (start, end) = parse_srt_timing(timing)?;
            let text = lines.collect::<Vec<_>>().join(" ");

            segments.push(Segment {
                id: segments.len() as u32,
                text,
                start,
                end,
            });
        }

        Ok(Self::renumber(Self::retain_valid(segments)))
    }

    /// Assign ids `0..n` in timeline order. Translations are attached to
    /// subtitle lines by id, so ids must be unique within a chunk.
    pub fn renumber(segments: Vec<Segment>) -> Vec<Segment> {
        segments
            .into_iter()
            .enumerate()
            .map(|(idx, mut seg)| {
                seg.id = idx as u32;
                seg
            })
            .collect()
    }

    pub(crate) fn retain_valid(segments: Vec<Segment>) -> Vec<Segment> {
        segments
            .into_iter()
            .filter(|seg| {
                if seg.end > seg.start {
                    true
                } else {
                    warn!(
                        "Skipping segment {} with non-positive duration ({:.3} -> {:.3})",
                        seg.id, seg.start, seg.end
                    );
                    false
                }
            })
            .collect()
    }
}

fn parse_srt_timing(line: &str) -> Result<(f64, f64)> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| KotobaError::InvalidTranscript(format!("Invalid SRT timing line: {}", line)))?;

    // Position cues may follow the end timestamp
    let end = end.split_whitespace().next().unwrap_or_default();

    Ok((parse_srt_time(start.trim())?, parse_srt_time(end)?))
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too). The fraction is
/// read as a decimal fraction of a second, so `,5` is 500 ms.
fn parse_srt_time(value: &str) -> Result<f64> {
    let invalid = || KotobaError::InvalidTranscript(format!("Invalid SRT timestamp: {}", value));

    let (clock, fraction) = value
        .split_once(',')
        .or_else(|| value.split_once('.'))
        .unwrap_or((value, "0"));

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid())?;
    let seconds: u64 = parts[2].parse().map_err(|_| invalid())?;

    if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let fraction: f64 = format!("0.{}", fraction).parse().map_err(|_| invalid())?;

    let whole = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add(seconds))
        .ok_or_else(invalid)?;

    Ok(whole as f64 + fraction)
}

#[derive(Debug, Clone, Copy)]
struct TokenSpan<'a> {
    offset: usize,
    surface: &'a str,
    sentence_initial: bool,
}

/// Word spans per UAX #29. Contractions ("don't", "l'homme") and decimals
/// ("3.5") stay single words; the first word of each sentence is marked.
fn token_spans(text: &str) -> Vec<TokenSpan<'_>> {
    text.split_sentence_bound_indices()
        .flat_map(|(sentence_offset, sentence)| {
            sentence
                .unicode_word_indices()
                .enumerate()
                .map(move |(position, (offset, surface))| TokenSpan {
                    offset: sentence_offset + offset,
                    surface,
                    sentence_initial: position == 0,
                })
        })
        .collect()
}

/// Tokenize a segment into words, distributing its duration evenly.
pub fn tokenize(segment: &Segment) -> Vec<Word> {
    let spans = token_spans(&segment.text);
    if spans.is_empty() {
        return Vec::new();
    }

    let count = spans.len();
    let duration = segment.duration() / count as f64;

    let words: Vec<Word> = spans
        .into_iter()
        .enumerate()
        .map(|(index, span)| {
            let start = segment.start + index as f64 * duration;
            // The last word ends exactly on the segment boundary
            let end = if index + 1 == count {
                segment.end
            } else {
                segment.start + (index + 1) as f64 * duration
            };

            Word {
                surface: span.surface.to_string(),
                start,
                end,
                segment_id: segment.id,
                index,
                offset: span.offset,
                sentence_initial: span.sentence_initial,
            }
        })
        .collect();

    debug!("Segment {} tokenized into {} words", segment.id, words.len());
    words
}
