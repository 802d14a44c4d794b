use serde::{Deserialize, Serialize};

use crate::asr::TimedText;
use crate::merge::DegradedSegment;
use crate::mode::{Mode, ModeOverride};

/// Per-request options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeOptions {
    /// Language hint (ISO 639-1). Falls back to the configured model language.
    pub language: Option<String>,
    pub mode: ModeOverride,
    /// Opaque caller identity, hashed into the session id.
    pub caller: Option<String>,
}

/// Wall-clock time spent in each stage, in milliseconds. Stages that did not
/// run stay at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub acquire_ms: u64,
    pub convert_ms: u64,
    pub chunk_ms: u64,
    pub dispatch_ms: u64,
    pub collect_ms: u64,
    pub merge_ms: u64,
    pub single_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptResult {
    pub session_id: String,
    /// Ordered timeline in source time.
    pub timeline: Vec<TimedText>,
    pub text: String,
    pub language: Option<String>,
    /// Duration of the normalized waveform, seconds.
    pub duration_secs: f64,
    /// Mode that produced the transcript.
    pub mode: Mode,
    /// Pooled execution failed and the single-worker path produced this result.
    pub fallback_used: bool,
    pub segment_count: usize,
    pub degraded_segment_count: usize,
    pub degraded_segments: Vec<DegradedSegment>,
    pub timings: StageTimings,
}
