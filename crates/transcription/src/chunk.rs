//! Segment preparation: slices a normalized waveform into bounded-duration
//! WAV files inside the session's segments area.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use longform_config::ChunkingSettings;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::ChunkingError;
use crate::session::Session;

/// One bounded slice of the source waveform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// 0-based position in the source timeline.
    pub index: usize,
    /// Start of the slice in the source timeline, seconds.
    pub start_offset: f64,
    /// Length of the slice, seconds.
    pub duration: f64,
    pub path: PathBuf,
}

impl Segment {
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }
}

/// Frame range of one planned slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub index: usize,
    pub start_frame: u64,
    pub frame_count: u64,
}

/// Splits `total_frames` into ranges of at most `chunk_duration` seconds.
///
/// Consecutive ranges start `chunk_duration - overlap` seconds apart. The last
/// range may be shorter; it is never padded.
pub fn plan_slices(
    total_frames: u64,
    sample_rate: u32,
    chunk_duration: f64,
    overlap: f64,
) -> Result<Vec<SliceRange>, ChunkingError> {
    if !chunk_duration.is_finite() || chunk_duration <= 0.0 {
        return Err(ChunkingError::InvalidChunkDuration(chunk_duration));
    }
    if !overlap.is_finite() || overlap < 0.0 || overlap >= chunk_duration {
        return Err(ChunkingError::InvalidOverlap {
            overlap,
            duration: chunk_duration,
        });
    }

    let rate = sample_rate as f64;
    let chunk_frames = (chunk_duration * rate).round() as u64;
    let overlap_frames = (overlap * rate).round() as u64;
    if chunk_frames == 0 || overlap_frames >= chunk_frames {
        return Err(ChunkingError::InvalidChunkDuration(chunk_duration));
    }
    let step_frames = chunk_frames - overlap_frames;

    let mut ranges = Vec::new();
    let mut start = 0u64;
    while start < total_frames {
        let end = (start + chunk_frames).min(total_frames);
        ranges.push(SliceRange {
            index: ranges.len(),
            start_frame: start,
            frame_count: end - start,
        });
        if end == total_frames {
            break;
        }
        start += step_frames;
    }
    Ok(ranges)
}

/// Splits waveforms into segments with bounded parallelism.
#[derive(Debug, Clone)]
pub struct ChunkPreparer {
    overlap: f64,
    parallelism: usize,
}

impl ChunkPreparer {
    pub fn new(settings: &ChunkingSettings) -> Self {
        Self {
            overlap: settings.overlap_secs,
            parallelism: settings.parallelism().max(1),
        }
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    /// Writes every slice of `waveform` to `session.segments_dir()` and returns
    /// them in ascending index order. Any failed slice fails the whole call.
    pub async fn prepare(
        &self,
        session: &Session,
        waveform: &Path,
        chunk_duration: f64,
    ) -> Result<Vec<Segment>, ChunkingError> {
        let (spec, total_frames) = read_header(waveform).await?;
        if total_frames == 0 {
            return Err(ChunkingError::EmptyWaveform(waveform.to_path_buf()));
        }

        let ranges = plan_slices(total_frames, spec.sample_rate, chunk_duration, self.overlap)?;
        let out_dir = session.segments_dir();
        info!(
            session_id = %session.id(),
            segments = ranges.len(),
            total_secs = total_frames as f64 / spec.sample_rate as f64,
            chunk_duration,
            "Preparing segments"
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut set = JoinSet::new();
        let total = ranges.len();

        for range in ranges {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| ChunkingError::SliceExtraction {
                    index: range.index,
                    reason: e.to_string(),
                })?;
            let source = waveform.to_path_buf();
            let target = out_dir.join(format!("segment_{:05}.wav", range.index));
            set.spawn_blocking(move || {
                let _permit = permit;
                extract_slice(&source, &target, range, spec)
            });
        }

        let mut segments: Vec<Option<Segment>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| ChunkingError::SliceExtraction {
                index: usize::MAX,
                reason: format!("slice task failed: {e}"),
            });
            match result.and_then(|r| r) {
                Ok(segment) => {
                    let index = segment.index;
                    segments[index] = Some(segment);
                }
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        let segments: Vec<Segment> = segments.into_iter().flatten().collect();
        if segments.len() != total {
            return Err(ChunkingError::SliceExtraction {
                index: segments.len(),
                reason: "missing slice output".to_string(),
            });
        }
        Ok(segments)
    }
}

/// Sum of the segments' non-overlapping contribution, i.e. the source duration.
pub fn covered_duration(segments: &[Segment]) -> f64 {
    segments.last().map(Segment::end_offset).unwrap_or(0.0)
}

async fn read_header(path: &Path) -> Result<(hound::WavSpec, u64), ChunkingError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let reader = hound::WavReader::open(&path).map_err(|e| ChunkingError::Unreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok((reader.spec(), reader.duration() as u64))
    })
    .await
    .map_err(|e| ChunkingError::Unreadable {
        path: PathBuf::new(),
        reason: format!("header task failed: {e}"),
    })?
}

fn extract_slice(
    source: &Path,
    target: &Path,
    range: SliceRange,
    spec: hound::WavSpec,
) -> Result<Segment, ChunkingError> {
    let fail = |reason: String| ChunkingError::SliceExtraction {
        index: range.index,
        reason,
    };

    let mut reader = hound::WavReader::open(source).map_err(|e| fail(e.to_string()))?;
    reader
        .seek(range.start_frame as u32)
        .map_err(|e| fail(e.to_string()))?;
    let mut writer = hound::WavWriter::create(target, spec).map_err(|e| fail(e.to_string()))?;

    let wanted = range.frame_count as usize * spec.channels as usize;
    match spec.sample_format {
        hound::SampleFormat::Int => {
            for sample in reader.samples::<i32>().take(wanted) {
                let sample = sample.map_err(|e| fail(e.to_string()))?;
                writer.write_sample(sample).map_err(|e| fail(e.to_string()))?;
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>().take(wanted) {
                let sample = sample.map_err(|e| fail(e.to_string()))?;
                writer.write_sample(sample).map_err(|e| fail(e.to_string()))?;
            }
        }
    }
    writer.finalize().map_err(|e| fail(e.to_string()))?;

    let rate = spec.sample_rate as f64;
    debug!(segment = range.index, path = %target.display(), "Segment written");
    Ok(Segment {
        index: range.index,
        start_offset: range.start_frame as f64 / rate,
        duration: range.frame_count as f64 / rate,
        path: target.to_path_buf(),
    })
}
