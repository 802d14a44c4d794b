//! Error taxonomy for the transcription pipeline, one enum per failure domain.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the acquisition collaborator.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Source not found: {0}")]
    NotFound(String),
    #[error("Source too long: {duration_secs:.1}s exceeds limit of {limit_secs:.1}s")]
    TooLong { duration_secs: f64, limit_secs: f64 },
    #[error("Source too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unsupported source reference: {0}")]
    Unsupported(String),
    #[error("I/O error during acquisition: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the conversion collaborator (corrupt or unsupported input).
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Unsupported input '{path}': {reason}")]
    Unsupported { path: PathBuf, reason: String },
    #[error("Corrupt input '{path}': {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Converter failed: {0}")]
    Tool(String),
    #[error("I/O error during conversion: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while splitting a waveform into segments.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("Waveform '{0}' has zero duration")]
    EmptyWaveform(PathBuf),
    #[error("Invalid chunk duration: {0}s")]
    InvalidChunkDuration(f64),
    #[error("Invalid overlap {overlap}s for chunk duration {duration}s")]
    InvalidOverlap { overlap: f64, duration: f64 },
    #[error("Cannot read waveform '{path}': {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("Failed to extract segment {index}: {reason}")]
    SliceExtraction { index: usize, reason: String },
}

/// Failure record for a single task; never crashes the worker that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerTaskError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),
    #[error("Worker exited before reporting a result")]
    WorkerLost,
    #[error("Pool is shutting down")]
    PoolShutdown,
}

/// Pool lifecycle failures.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool failed to start: {0}")]
    StartFailed(String),
    #[error("Worker pool is not ready (state: {0})")]
    NotReady(String),
    #[error("Worker pool degraded: {alive} of {configured} workers alive")]
    Degraded { alive: usize, configured: usize },
    #[error("Worker pool task queue is closed")]
    QueueClosed,
}

/// Workspace allocation or cleanup failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create session workspace '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to remove session workspace '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to scan sessions root '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Session scheduler error: {0}")]
    Scheduler(String),
}

/// Top-level error returned by [`crate::TranscriptionService::transcribe`].
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error("Segment {index} failed: {source}")]
    WorkerTask {
        index: usize,
        #[source]
        source: WorkerTaskError,
    },
    #[error(transparent)]
    PoolUnavailable(#[from] PoolError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("Single-worker transcription failed: {0}")]
    SingleWorker(String),
    #[error("Pooled transcription failed ({pooled}); single-worker fallback failed too ({fallback})")]
    FallbackFailed {
        pooled: Box<TranscribeError>,
        fallback: Box<TranscribeError>,
    },
}

impl TranscribeError {
    /// The caller's input is bad; retrying the same request will not help.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::Acquisition(e) => !matches!(e, AcquisitionError::Network(_) | AcquisitionError::Io(_)),
            Self::Conversion(e) => !matches!(e, ConversionError::Io(_)),
            Self::Chunking(e) => matches!(
                e,
                ChunkingError::EmptyWaveform(_) | ChunkingError::Unreadable { .. }
            ),
            Self::FallbackFailed { fallback, .. } => fallback.is_input_error(),
            _ => false,
        }
    }

    /// The service is temporarily degraded; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        !self.is_input_error()
    }

    /// Whether a pooled-path failure may be retried once through the single-worker path.
    ///
    /// Bad source data and whole-request timeouts are never retried.
    pub fn allows_fallback(&self) -> bool {
        match self {
            Self::PoolUnavailable(_) | Self::WorkerTask { .. } => true,
            // Chunking misconfiguration only breaks the pooled path
            Self::Chunking(
                ChunkingError::SliceExtraction { .. }
                | ChunkingError::InvalidChunkDuration(_)
                | ChunkingError::InvalidOverlap { .. },
            ) => true,
            _ => false,
        }
    }

    /// Short machine-readable tag used in logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acquisition(_) => "acquisition",
            Self::Conversion(_) => "conversion",
            Self::Chunking(_) => "chunking",
            Self::WorkerTask { .. } => "worker_task",
            Self::PoolUnavailable(_) => "pool_unavailable",
            Self::Session(_) => "session",
            Self::RequestTimeout(_) => "timeout",
            Self::SingleWorker(_) => "single_worker",
            Self::FallbackFailed { .. } => "fallback_failed",
        }
    }
}
