#[cfg(feature = "local-whisper")]
pub mod local_whisper;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request to transcribe one waveform file.
#[derive(Debug, Clone)]
pub struct AsrRequest {
    /// Normalized 16kHz mono WAV on disk.
    pub audio_path: PathBuf,
    /// Optional language hint (ISO 639-1, e.g. "en", "de").
    pub language_hint: Option<String>,
}

/// A timed piece of text. Offsets are in seconds, relative to the start of
/// whatever waveform was transcribed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedText {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Result of an ASR transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<TimedText>,
    pub language: Option<String>,
}

/// Trait for pluggable ASR backends.
///
/// A backend instance owns one loaded model. The pool never calls the same
/// instance from two tasks at once.
#[async_trait]
pub trait AsrBackend: Send + Sync + 'static {
    /// Transcribes a complete waveform file.
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<TranscriptionResult>;

    /// Human-readable backend name.
    fn name(&self) -> &str;
}

/// Loads model instances. Called once per worker, plus once for the
/// single-worker path.
#[async_trait]
pub trait ModelLoader: Send + Sync + 'static {
    async fn load(&self, worker_index: usize) -> anyhow::Result<Arc<dyn AsrBackend>>;
}
