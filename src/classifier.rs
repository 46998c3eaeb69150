use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::filter::{ClassifiedWord, WordStatus};
use crate::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentCategory {
    /// Every vocabulary candidate is known.
    Clear,
    /// At least one vocabulary candidate is unknown.
    Blocker,
    /// No vocabulary candidates at all.
    Empty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCounts {
    pub total: usize,
    pub known: usize,
    pub unknown: usize,
    pub skipped: usize,
}

impl WordCounts {
    fn record(&mut self, status: WordStatus) {
        self.total += 1;
        match status {
            WordStatus::Known => self.known += 1,
            WordStatus::Unknown => self.unknown += 1,
            WordStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn candidates(&self) -> usize {
        self.known + self.unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedSegment {
    #[serde(flatten)]
    pub segment: Segment,
    pub category: SegmentCategory,
    pub words: Vec<ClassifiedWord>,
    pub counts: WordCounts,
}

impl ClassifiedSegment {
    /// Distinct unknown surfaces in order of first occurrence.
    pub fn unknown_words(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.words
            .iter()
            .filter(|w| w.status == WordStatus::Unknown)
            .filter(|w| seen.insert(w.surface().to_string()))
            .map(|w| w.surface().to_string())
            .collect()
    }

    pub fn known_words(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.words
            .iter()
            .filter(|w| w.status == WordStatus::Known)
            .filter(|w| seen.insert(w.surface().to_string()))
            .map(|w| w.surface().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringStatistics {
    pub total_words: usize,
    pub known_count: usize,
    pub unknown_count: usize,
    pub skipped_count: usize,
    pub blocker_segment_count: usize,
    pub clear_segment_count: usize,
    pub empty_segment_count: usize,
}

impl FilteringStatistics {
    fn record(&mut self, segment: &ClassifiedSegment) {
        self.total_words += segment.counts.total;
        self.known_count += segment.counts.known;
        self.unknown_count += segment.counts.unknown;
        self.skipped_count += segment.counts.skipped;
        match segment.category {
            SegmentCategory::Blocker => self.blocker_segment_count += 1,
            SegmentCategory::Clear => self.clear_segment_count += 1,
            SegmentCategory::Empty => self.empty_segment_count += 1,
        }
    }

    /// Share of vocabulary candidates the learner knows, in percent.
    pub fn known_ratio(&self) -> f64 {
        let candidates = self.known_count + self.unknown_count;
        if candidates == 0 {
            100.0
        } else {
            self.known_count as f64 * 100.0 / candidates as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteringResult {
    pub segments: Vec<ClassifiedSegment>,
    pub statistics: FilteringStatistics,
}

impl FilteringResult {
    pub fn from_segments(segments: Vec<ClassifiedSegment>) -> Self {
        let mut statistics = FilteringStatistics::default();
        for segment in &segments {
            statistics.record(segment);
        }
        Self { segments, statistics }
    }

    /// Distinct unknown surfaces across all segments.
    pub fn unknown_words(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .flat_map(|s| s.words.iter())
            .filter(|w| w.status == WordStatus::Unknown)
            .map(|w| w.surface().to_string())
            .collect()
    }

    pub fn blockers(&self) -> impl Iterator<Item = &ClassifiedSegment> {
        self.segments
            .iter()
            .filter(|s| s.category == SegmentCategory::Blocker)
    }
}

pub struct SegmentClassifier;

impl SegmentClassifier {
    /// Derive a segment's category and counts from its words in one pass.
    pub fn classify(segment: Segment, words: Vec<ClassifiedWord>) -> ClassifiedSegment {
        let mut counts = WordCounts::default();
        for word in &words {
            counts.record(word.status);
        }

        let category = if counts.unknown > 0 {
            SegmentCategory::Blocker
        } else if counts.known > 0 {
            SegmentCategory::Clear
        } else {
            SegmentCategory::Empty
        };

        ClassifiedSegment {
            segment,
            category,
            words,
            counts,
        }
    }
}
