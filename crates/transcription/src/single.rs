use std::path::Path;
use std::sync::Arc;

use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info};

use crate::asr::{AsrBackend, AsrRequest, ModelLoader};
use crate::chunk::Segment;
use crate::error::TranscribeError;
use crate::merge::{MergedTranscript, SegmentOutcome, merge};

/// Worker index passed to [`ModelLoader::load`] for the single-worker model.
pub const SINGLE_WORKER_INDEX: usize = usize::MAX;

/// Transcribes whole waveforms in one pass on a dedicated model instance.
///
/// The model is loaded on first use and serves one request at a time.
pub struct SingleWorker {
    loader: Arc<dyn ModelLoader>,
    backend: OnceCell<Arc<dyn AsrBackend>>,
    gate: Semaphore,
}

impl SingleWorker {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            backend: OnceCell::new(),
            gate: Semaphore::new(1),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.initialized()
    }

    pub async fn transcribe(
        &self,
        waveform: &Path,
        duration: f64,
        language: Option<&str>,
    ) -> Result<MergedTranscript, TranscribeError> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                info!("Loading single-worker model");
                self.loader.load(SINGLE_WORKER_INDEX).await
            })
            .await
            .map_err(|e| TranscribeError::SingleWorker(format!("model load failed: {e:#}")))?
            .clone();

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| TranscribeError::SingleWorker(e.to_string()))?;

        debug!(path = %waveform.display(), duration, "Single-worker transcription");
        let result = backend
            .transcribe(AsrRequest {
                audio_path: waveform.to_path_buf(),
                language_hint: language.map(str::to_string),
            })
            .await
            .map_err(|e| TranscribeError::SingleWorker(format!("{e:#}")))?;

        let whole = Segment {
            index: 0,
            start_offset: 0.0,
            duration,
            path: waveform.to_path_buf(),
        };
        Ok(merge(vec![(whole, SegmentOutcome::Success(result))], 0.0, language))
    }
}
