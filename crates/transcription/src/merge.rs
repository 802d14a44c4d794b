//! Reassembly of per-segment outcomes into one ordered transcript.

use serde::Serialize;

use crate::asr::{TimedText, TranscriptionResult};
use crate::chunk::Segment;

/// Final outcome of one segment after the retry policy has run.
#[derive(Debug, Clone)]
pub enum SegmentOutcome {
    Success(TranscriptionResult),
    /// Failed on every attempt; merged as empty text.
    Degraded { reason: String },
}

/// A segment that contributed empty text to the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradedSegment {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergedTranscript {
    /// Ordered by start time, offsets in the source timeline.
    pub timeline: Vec<TimedText>,
    pub text: String,
    pub language: Option<String>,
    pub degraded: Vec<DegradedSegment>,
}

/// Merges outcomes in segment index order, whatever order they arrive in.
///
/// Sub-segment offsets are rebased by each segment's start offset. When
/// segments overlap, a sub-segment is kept only by the segment whose
/// ownership window contains its midpoint; segment `i` owns
/// `[start_i + overlap/2, start_{i+1} + overlap/2)`, with the first and last
/// windows open-ended. A result without timed sub-segments has its words
/// spread evenly over the segment and is cut to the window the same way.
pub fn merge(
    mut parts: Vec<(Segment, SegmentOutcome)>,
    overlap: f64,
    language_hint: Option<&str>,
) -> MergedTranscript {
    parts.sort_by_key(|(segment, _)| segment.index);

    let half = overlap.max(0.0) / 2.0;
    let starts: Vec<f64> = parts.iter().map(|(s, _)| s.start_offset).collect();

    let mut merged = MergedTranscript::default();
    let mut texts = Vec::with_capacity(parts.len());
    let mut languages = Vec::new();

    for (position, (segment, outcome)) in parts.into_iter().enumerate() {
        let result = match outcome {
            SegmentOutcome::Success(result) => result,
            SegmentOutcome::Degraded { reason } => {
                merged.timeline.push(TimedText {
                    start: segment.start_offset,
                    end: segment.end_offset(),
                    text: String::new(),
                });
                merged.degraded.push(DegradedSegment {
                    index: segment.index,
                    start: segment.start_offset,
                    end: segment.end_offset(),
                    reason,
                });
                continue;
            }
        };

        if let Some(lang) = result.language.as_deref().filter(|l| !l.is_empty()) {
            languages.push(lang.to_string());
        }

        let lower = match position {
            0 => f64::NEG_INFINITY,
            _ => segment.start_offset + half,
        };
        let upper = starts
            .get(position + 1)
            .map(|next| next + half)
            .unwrap_or(f64::INFINITY);

        if result.segments.is_empty() {
            let entry = if half == 0.0 {
                TimedText {
                    start: segment.start_offset,
                    end: segment.end_offset(),
                    text: result.text.trim().to_string(),
                }
            } else {
                TimedText {
                    start: lower.max(segment.start_offset),
                    end: upper.min(segment.end_offset()),
                    text: owned_words(&result.text, &segment, lower, upper),
                }
            };
            texts.push(entry.text.clone());
            merged.timeline.push(entry);
            continue;
        }

        let mut kept = Vec::with_capacity(result.segments.len());
        for local in result.segments {
            let global = TimedText {
                start: local.start + segment.start_offset,
                end: local.end + segment.start_offset,
                text: local.text.trim().to_string(),
            };
            let midpoint = (global.start + global.end) / 2.0;
            if half == 0.0 || (midpoint >= lower && midpoint < upper) {
                kept.push(global);
            }
        }

        let text = if half == 0.0 {
            result.text.trim().to_string()
        } else {
            join_text(kept.iter().map(|t| t.text.as_str()))
        };
        texts.push(text);
        merged.timeline.extend(kept);
    }

    merged.timeline.sort_by(|a, b| a.start.total_cmp(&b.start));
    merged.text = join_text(texts.iter().map(String::as_str));
    merged.language = majority_language(&languages).or_else(|| language_hint.map(str::to_string));
    merged
}

/// Words of an untimed transcript whose evenly spaced midpoints fall in
/// `[lower, upper)`.
fn owned_words(text: &str, segment: &Segment, lower: f64, upper: f64) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || segment.duration <= 0.0 {
        return text.trim().to_string();
    }
    let step = segment.duration / words.len() as f64;
    words
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let midpoint = segment.start_offset + (*i as f64 + 0.5) * step;
            midpoint >= lower && midpoint < upper
        })
        .map(|(_, word)| *word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Most frequent language; ties go to the one seen first.
fn majority_language(languages: &[String]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for lang in languages {
        match counts.iter_mut().find(|(l, _)| *l == lang.as_str()) {
            Some((_, n)) => *n += 1,
            None => counts.push((lang.as_str(), 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (lang, n) in counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((lang, n));
        }
    }
    best.map(|(lang, _)| lang.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn segment(index: usize, start: f64, duration: f64) -> Segment {
        Segment {
            index,
            start_offset: start,
            duration,
            path: PathBuf::from(format!("segment_{index:05}.wav")),
        }
    }

    fn spoken(text: &str, local: &[(f64, f64, &str)], lang: Option<&str>) -> SegmentOutcome {
        SegmentOutcome::Success(TranscriptionResult {
            text: text.to_string(),
            segments: local
                .iter()
                .map(|(s, e, t)| TimedText {
                    start: *s,
                    end: *e,
                    text: t.to_string(),
                })
                .collect(),
            language: lang.map(str::to_string),
        })
    }

    #[test]
    fn test_merge_restores_index_order_and_rebases() {
        let parts = vec![
            (segment(2, 20.0, 5.0), spoken("three", &[(0.5, 2.0, "three")], None)),
            (segment(0, 0.0, 10.0), spoken("one", &[(1.0, 3.0, "one")], None)),
            (segment(1, 10.0, 10.0), spoken("two", &[(0.0, 4.0, "two")], None)),
        ];

        let merged = merge(parts, 0.0, Some("en"));
        assert_eq!(merged.text, "one two three");
        let starts: Vec<f64> = merged.timeline.iter().map(|t| t.start).collect();
        assert_eq!(starts, vec![1.0, 10.0, 20.5]);
        assert_eq!(merged.timeline[2].end, 22.0);
        assert_eq!(merged.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_degraded_segment_is_empty_range() {
        let parts = vec![
            (segment(0, 0.0, 10.0), spoken("a", &[], None)),
            (
                segment(1, 10.0, 10.0),
                SegmentOutcome::Degraded {
                    reason: "decoder error".into(),
                },
            ),
            (segment(2, 20.0, 3.0), spoken("c", &[], None)),
        ];

        let merged = merge(parts, 0.0, None);
        assert_eq!(merged.text, "a c");
        assert_eq!(merged.degraded.len(), 1);
        assert_eq!(merged.degraded[0].index, 1);
        assert_eq!(merged.timeline.len(), 3);
        assert_eq!(merged.timeline[1].text, "");
        assert_eq!((merged.timeline[1].start, merged.timeline[1].end), (10.0, 20.0));
        assert_eq!(merged.timeline[2].end, 23.0);
    }

    #[test]
    fn test_overlap_keeps_each_phrase_once() {
        // segments of 10s with 2s overlap: starts at 0 and 8, boundary at 9
        let parts = vec![
            (
                segment(0, 0.0, 10.0),
                spoken("", &[(0.0, 4.0, "hello"), (7.5, 9.9, "there")], None),
            ),
            (
                segment(1, 8.0, 6.0),
                spoken("", &[(0.0, 1.9, "there"), (2.0, 5.0, "friend")], None),
            ),
        ];

        let merged = merge(parts, 2.0, None);
        assert_eq!(merged.text, "hello there friend");
        assert_eq!(merged.timeline.len(), 3);
    }

    #[test]
    fn test_overlap_trims_untimed_text_to_owner_window() {
        // boundary at 9: one word per second, the overlap second is kept once
        let parts = vec![
            (segment(0, 0.0, 10.0), spoken("a b c d e f g h i j", &[], None)),
            (segment(1, 8.0, 10.0), spoken("k l m n o p q r s t", &[], None)),
        ];

        let merged = merge(parts, 2.0, None);
        assert_eq!(merged.text, "a b c d e f g h i l m n o p q r s t");
        assert_eq!((merged.timeline[0].start, merged.timeline[0].end), (0.0, 9.0));
        assert_eq!((merged.timeline[1].start, merged.timeline[1].end), (9.0, 18.0));
    }

    #[test]
    fn test_language_majority_with_first_seen_tiebreak() {
        let parts = vec![
            (segment(0, 0.0, 1.0), spoken("a", &[], Some("de"))),
            (segment(1, 1.0, 1.0), spoken("b", &[], Some("en"))),
            (segment(2, 2.0, 1.0), spoken("c", &[], Some("en"))),
        ];
        assert_eq!(merge(parts, 0.0, None).language.as_deref(), Some("en"));

        assert_eq!(
            majority_language(&["fr".to_string(), "it".to_string()]).as_deref(),
            Some("fr")
        );
        assert_eq!(majority_language(&[]), None);
    }
}
