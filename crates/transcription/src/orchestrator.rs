//! Pooled execution: chunk, fan out over the worker pool, collect with
//! retry-then-degrade, merge.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use longform_config::{ChunkingSettings, PipelineSettings};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkPreparer, Segment};
use crate::error::{TranscribeError, WorkerTaskError};
use crate::merge::{MergedTranscript, SegmentOutcome, merge};
use crate::pool::WorkerPool;
use crate::session::Session;
use crate::task::{Task, TaskHandle, TaskResult};
use crate::transcript::StageTimings;

/// Per-request pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    Acquiring,
    Converting,
    Chunking,
    Dispatching,
    Collecting,
    Merging,
    Completed,
    Failed,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Acquiring => "acquiring",
            Self::Converting => "converting",
            Self::Chunking => "chunking",
            Self::Dispatching => "dispatching",
            Self::Collecting => "collecting",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one request through [`RequestState`] and logs each transition.
#[derive(Debug)]
pub struct RequestTracker {
    session_id: String,
    state: RequestState,
    failed_at: Option<RequestState>,
    started: Instant,
}

impl RequestTracker {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: RequestState::Created,
            failed_at: None,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// State the request was in when it failed.
    pub fn failed_at(&self) -> Option<RequestState> {
        self.failed_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn transition(&mut self, next: RequestState) {
        debug!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "Request state"
        );
        self.state = next;
    }

    pub fn fail(&mut self, error: &TranscribeError) {
        warn!(
            session_id = %self.session_id,
            stage = %self.state,
            kind = error.kind(),
            error = %error,
            "Request failed"
        );
        self.failed_at = Some(self.state);
        self.state = RequestState::Failed;
    }
}

/// Output of a pooled run.
#[derive(Debug, Clone)]
pub struct PooledRun {
    pub merged: MergedTranscript,
    pub segment_count: usize,
}

/// Drives the pooled half of the pipeline for one request at a time; many
/// requests share one orchestrator and one pool.
pub struct Orchestrator {
    pool: Arc<WorkerPool>,
    preparer: ChunkPreparer,
    chunk_duration: f64,
    task_timeout: Duration,
    max_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<WorkerPool>,
        chunking: &ChunkingSettings,
        pipeline: &PipelineSettings,
    ) -> Self {
        Self {
            pool,
            preparer: ChunkPreparer::new(chunking),
            chunk_duration: chunking.chunk_duration_secs,
            task_timeout: pipeline.task_timeout(),
            max_attempts: pipeline.max_task_attempts.max(1),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Chunking → Dispatching → Collecting → Merging.
    ///
    /// A segment that fails `max_task_attempts` times is merged as empty text.
    /// If every segment ends up degraded the run fails instead, so the caller
    /// can fall back.
    pub async fn run(
        &self,
        session: &Session,
        waveform: &Path,
        language: Option<&str>,
        tracker: &mut RequestTracker,
        timings: &mut StageTimings,
    ) -> Result<PooledRun, TranscribeError> {
        tracker.transition(RequestState::Chunking);
        let stage = Instant::now();
        let segments = self
            .preparer
            .prepare(session, waveform, self.chunk_duration)
            .await?;
        timings.chunk_ms = elapsed_ms(stage);

        tracker.transition(RequestState::Dispatching);
        let stage = Instant::now();
        let mut pending = FuturesUnordered::new();
        for segment in &segments {
            let handle = self.pool.submit(task_for(session, segment, language)).await?;
            pending.push(await_result(handle, self.task_timeout, 1));
        }
        timings.dispatch_ms = elapsed_ms(stage);
        debug!(
            session_id = %session.id(),
            tasks = segments.len(),
            "Dispatched segments"
        );

        tracker.transition(RequestState::Collecting);
        let stage = Instant::now();
        let mut outcomes: Vec<Option<SegmentOutcome>> = vec![None; segments.len()];
        let mut last_error: Option<(usize, WorkerTaskError)> = None;
        while let Some((index, attempt, result)) = pending.next().await {
            match result {
                Ok(transcription) => {
                    outcomes[index] = Some(SegmentOutcome::Success(transcription));
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        session_id = %session.id(),
                        segment = index,
                        attempt,
                        error = %e,
                        "Segment failed, resubmitting"
                    );
                    let handle = self
                        .pool
                        .submit(task_for(session, &segments[index], language))
                        .await?;
                    pending.push(await_result(handle, self.task_timeout, attempt + 1));
                }
                Err(e) => {
                    warn!(
                        session_id = %session.id(),
                        segment = index,
                        attempts = attempt,
                        error = %e,
                        "Segment degraded"
                    );
                    outcomes[index] = Some(SegmentOutcome::Degraded {
                        reason: e.to_string(),
                    });
                    last_error = Some((index, e));
                }
            }
        }
        timings.collect_ms = elapsed_ms(stage);

        let degraded = outcomes
            .iter()
            .filter(|o| !matches!(o, Some(SegmentOutcome::Success(_))))
            .count();
        if degraded == segments.len() {
            let (index, source) = last_error.unwrap_or((0, WorkerTaskError::WorkerLost));
            return Err(TranscribeError::WorkerTask { index, source });
        }

        tracker.transition(RequestState::Merging);
        let stage = Instant::now();
        let segment_count = segments.len();
        let parts = segments
            .into_iter()
            .zip(outcomes)
            .map(|(segment, outcome)| {
                let outcome = outcome.unwrap_or_else(|| SegmentOutcome::Degraded {
                    reason: "no result collected".to_string(),
                });
                (segment, outcome)
            })
            .collect();
        let merged = merge(parts, self.preparer.overlap(), language);
        timings.merge_ms = elapsed_ms(stage);

        info!(
            session_id = %session.id(),
            segments = segment_count,
            degraded,
            text_len = merged.text.len(),
            "Pooled transcription merged"
        );
        Ok(PooledRun {
            merged,
            segment_count,
        })
    }
}

fn task_for(session: &Session, segment: &Segment, language: Option<&str>) -> Task {
    Task::new(
        session.id(),
        segment.index,
        segment.path.clone(),
        language.map(str::to_string),
    )
}

async fn await_result(
    handle: TaskHandle,
    timeout: Duration,
    attempt: u32,
) -> (usize, u32, TaskResult) {
    let index = handle.index();
    (index, attempt, handle.wait(timeout).await)
}

pub(crate) fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_records_failing_stage() {
        let mut tracker = RequestTracker::new("s");
        assert_eq!(tracker.state(), RequestState::Created);
        tracker.transition(RequestState::Acquiring);
        tracker.transition(RequestState::Converting);
        tracker.fail(&TranscribeError::RequestTimeout(Duration::from_secs(1)));
        assert_eq!(tracker.state(), RequestState::Failed);
        assert_eq!(tracker.failed_at(), Some(RequestState::Converting));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RequestState::Collecting.to_string(), "collecting");
        assert_eq!(
            serde_json::to_string(&RequestState::Completed).unwrap(),
            "\"completed\""
        );
    }
}
