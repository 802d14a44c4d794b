use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use longform_config::{PipelineSettings, Settings};
use tracing::{info, warn};

use crate::acquisition::{FetchConstraints, SourceFetcher};
use crate::asr::ModelLoader;
use crate::error::{ChunkingError, ConversionError, TranscribeError};
use crate::merge::MergedTranscript;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::mode::{Mode, ModeOverride, select_mode};
use crate::orchestrator::{Orchestrator, RequestState, RequestTracker, elapsed_ms};
use crate::pipeline::{AudioConverter, wav_duration_secs};
use crate::pool::WorkerPool;
use crate::session::{Session, SessionLease, SessionManager};
use crate::single::SingleWorker;
use crate::transcript::{StageTimings, TranscribeOptions, TranscriptResult};

const NORMALIZED_WAVEFORM: &str = "normalized.wav";

/// External collaborators the service drives.
pub struct Collaborators {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub converter: Arc<dyn AudioConverter>,
    /// Loads the model used by the single-worker path.
    pub single_loader: Arc<dyn ModelLoader>,
}

/// Entry point for callers: one `transcribe` per request, any number of
/// requests in flight.
pub struct TranscriptionService {
    pipeline: PipelineSettings,
    constraints: FetchConstraints,
    default_language: Option<String>,
    sessions: Arc<SessionManager>,
    fetcher: Arc<dyn SourceFetcher>,
    converter: Arc<dyn AudioConverter>,
    orchestrator: Orchestrator,
    single: SingleWorker,
    metrics: ServiceMetrics,
}

impl TranscriptionService {
    pub fn new(
        settings: &Settings,
        sessions: Arc<SessionManager>,
        pool: Arc<WorkerPool>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            pipeline: settings.pipeline.clone(),
            constraints: FetchConstraints::from(&settings.acquisition),
            default_language: settings.model.language.clone(),
            sessions,
            fetcher: collaborators.fetcher,
            converter: collaborators.converter,
            orchestrator: Orchestrator::new(pool, &settings.chunking, &settings.pipeline),
            single: SingleWorker::new(collaborators.single_loader),
            metrics: ServiceMetrics::default(),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.orchestrator.pool()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Mode an `Auto` request with this estimated duration would run in now.
    pub fn select_mode(&self, estimated_duration: f64) -> Mode {
        select_mode(
            estimated_duration,
            self.pool().is_healthy(),
            &self.pipeline,
            ModeOverride::Auto,
        )
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.sessions.active_count(), self.pool().health().queue_depth)
    }

    /// Transcribes `source` end to end.
    ///
    /// The session is released on every path, including when the returned
    /// future is dropped mid-flight. Pooled failures that are not
    /// caused by the source itself are retried once on the single-worker path.
    pub async fn transcribe(
        &self,
        source: &str,
        options: TranscribeOptions,
    ) -> Result<TranscriptResult, TranscribeError> {
        self.metrics.request_started();
        let caller = options.caller.as_deref().unwrap_or("anonymous");
        let lease = match SessionLease::acquire(Arc::clone(&self.sessions), caller).await {
            Ok(lease) => lease,
            Err(e) => {
                self.metrics.record_failure(&StageTimings::default());
                return Err(e.into());
            }
        };

        let session = lease.session();
        let mut tracker = RequestTracker::new(session.id());
        let mut timings = StageTimings::default();
        let request_timeout = self.pipeline.request_timeout();
        let outcome = match tokio::time::timeout(
            request_timeout,
            self.execute(session, source, &options, &mut tracker, &mut timings),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TranscribeError::RequestTimeout(request_timeout)),
        };
        timings.total_ms = tracker.elapsed().as_millis() as u64;

        lease.mark_completing();
        let outcome = match outcome {
            Ok(mut result) => {
                result.timings = timings;
                tracker.transition(RequestState::Completed);
                self.metrics.record_success(&result);
                info!(
                    session_id = %session.id(),
                    mode = ?result.mode,
                    fallback_used = result.fallback_used,
                    segments = result.segment_count,
                    degraded = result.degraded_segment_count,
                    total_ms = timings.total_ms,
                    "Transcription completed"
                );
                Ok(result)
            }
            Err(e) => {
                tracker.fail(&e);
                self.metrics.record_failure(&timings);
                Err(e)
            }
        };

        let session_id = session.id().to_string();
        if let Err(e) = lease.release().await {
            warn!(%session_id, error = %e, "Failed to release session");
        }
        outcome
    }

    async fn execute(
        &self,
        session: &Session,
        source: &str,
        options: &TranscribeOptions,
        tracker: &mut RequestTracker,
        timings: &mut StageTimings,
    ) -> Result<TranscriptResult, TranscribeError> {
        let language = options
            .language
            .clone()
            .or_else(|| self.default_language.clone());
        let language = language.as_deref();

        tracker.transition(RequestState::Acquiring);
        let stage = Instant::now();
        let fetched = self
            .fetcher
            .fetch(source, &self.constraints, &session.acquisition_dir())
            .await?;
        timings.acquire_ms = elapsed_ms(stage);

        tracker.transition(RequestState::Converting);
        let stage = Instant::now();
        let waveform = session.acquisition_dir().join(NORMALIZED_WAVEFORM);
        self.converter.convert(&fetched.path, &waveform).await?;
        let duration = waveform_duration(&waveform).await?;
        timings.convert_ms = elapsed_ms(stage);
        if duration <= 0.0 {
            return Err(ChunkingError::EmptyWaveform(waveform).into());
        }

        let estimate = fetched.duration_estimate.unwrap_or(duration);
        let mode = select_mode(
            estimate,
            self.pool().is_healthy(),
            &self.pipeline,
            options.mode,
        );
        info!(
            session_id = %session.id(),
            estimate_secs = estimate,
            requested = ?options.mode,
            ?mode,
            "Execution mode selected"
        );

        let report = Report {
            session,
            duration,
        };
        match mode {
            Mode::Single => {
                let merged = self.run_single(&waveform, duration, language, tracker, timings).await?;
                Ok(report.build(merged, Mode::Single, false, 1))
            }
            Mode::Pooled => {
                let pooled = match self
                    .orchestrator
                    .run(session, &waveform, language, tracker, timings)
                    .await
                {
                    Ok(run) => {
                        return Ok(report.build(run.merged, Mode::Pooled, false, run.segment_count));
                    }
                    Err(e) if e.allows_fallback() => e,
                    Err(e) => return Err(e),
                };

                warn!(
                    session_id = %session.id(),
                    error = %pooled,
                    "Pooled transcription failed, falling back to single worker"
                );
                self.metrics.fallback_taken();
                match self.run_single(&waveform, duration, language, tracker, timings).await {
                    Ok(merged) => Ok(report.build(merged, Mode::Single, true, 1)),
                    Err(fallback) => Err(TranscribeError::FallbackFailed {
                        pooled: Box::new(pooled),
                        fallback: Box::new(fallback),
                    }),
                }
            }
        }
    }

    async fn run_single(
        &self,
        waveform: &Path,
        duration: f64,
        language: Option<&str>,
        tracker: &mut RequestTracker,
        timings: &mut StageTimings,
    ) -> Result<MergedTranscript, TranscribeError> {
        let stage = Instant::now();
        let merged = self.single.transcribe(waveform, duration, language).await?;
        timings.single_ms = elapsed_ms(stage);
        tracker.transition(RequestState::Merging);
        Ok(merged)
    }
}

struct Report<'a> {
    session: &'a Session,
    duration: f64,
}

impl Report<'_> {
    fn build(
        &self,
        merged: MergedTranscript,
        mode: Mode,
        fallback_used: bool,
        segment_count: usize,
    ) -> TranscriptResult {
        TranscriptResult {
            session_id: self.session.id().to_string(),
            timeline: merged.timeline,
            text: merged.text,
            language: merged.language,
            duration_secs: self.duration,
            mode,
            fallback_used,
            segment_count,
            degraded_segment_count: merged.degraded.len(),
            degraded_segments: merged.degraded,
            timings: StageTimings::default(),
        }
    }
}

async fn waveform_duration(path: &Path) -> Result<f64, TranscribeError> {
    let owned: PathBuf = path.to_path_buf();
    let duration = tokio::task::spawn_blocking(move || wav_duration_secs(&owned))
        .await
        .map_err(|e| ConversionError::Tool(format!("duration lookup failed: {e}")))?;
    duration.map_err(|e| {
        ConversionError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        }
        .into()
    })
}
