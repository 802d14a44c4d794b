use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AsrBackend, AsrRequest, ModelLoader, TimedText, TranscriptionResult};
use crate::pipeline::wav_reader::read_wav_16k_mono;

/// Get the language string for a whisper language ID.
fn whisper_lang_str(lang_id: i32) -> Option<String> {
    whisper_rs::get_lang_str(lang_id).map(|s| s.to_string())
}

/// Whisper timestamps are in centiseconds.
fn centis_to_secs(t: i64) -> f64 {
    t as f64 / 100.0
}

/// Local Whisper ASR backend using whisper.cpp via whisper-rs.
pub struct LocalWhisperBackend {
    ctx: Arc<WhisperContext>,
    default_language: Option<String>,
}

impl LocalWhisperBackend {
    /// Creates a new Whisper backend, loading the model from disk.
    ///
    /// `model_path` should point to a GGML Whisper model file (e.g. ggml-base.bin).
    pub fn new(model_path: &str, default_language: Option<String>) -> anyhow::Result<Self> {
        info!(model_path, "Loading Whisper model");
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("Failed to load Whisper model '{}': {}", model_path, e))?;
        info!("Whisper model loaded");
        Ok(Self {
            ctx: Arc::new(ctx),
            default_language,
        })
    }
}

#[async_trait]
impl AsrBackend for LocalWhisperBackend {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<TranscriptionResult> {
        let lang = request
            .language_hint
            .or_else(|| self.default_language.clone());
        let ctx = Arc::clone(&self.ctx);
        let path = request.audio_path;

        // whisper-rs is CPU-bound; run on blocking thread pool
        tokio::task::spawn_blocking(move || -> anyhow::Result<TranscriptionResult> {
            let (audio, _) = read_wav_16k_mono(&path)?;

            let mut state = ctx
                .create_state()
                .map_err(|e| anyhow::anyhow!("Failed to create Whisper state: {}", e))?;

            let mut params = FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: 1.0,
            });

            if let Some(ref lang) = lang {
                params.set_language(Some(lang));
            } else {
                params.set_detect_language(true);
            }

            params.set_translate(false);
            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_single_segment(false);
            params.set_suppress_blank(true);

            state
                .full(params, &audio)
                .map_err(|e| anyhow::anyhow!("Whisper transcription failed: {}", e))?;

            let mut text = String::new();
            let mut segments = Vec::new();
            for i in 0..state.full_n_segments() {
                if let Some(segment) = state.get_segment(i)
                    && let Ok(seg_text) = segment.to_str()
                {
                    text.push_str(seg_text);
                    segments.push(TimedText {
                        start: centis_to_secs(segment.start_timestamp()),
                        end: centis_to_secs(segment.end_timestamp()),
                        text: seg_text.trim().to_string(),
                    });
                }
            }

            let detected_lang = whisper_lang_str(state.full_lang_id_from_state()).or(lang);
            debug!(text_len = text.len(), ?detected_lang, "Whisper transcription complete");

            Ok(TranscriptionResult {
                text: text.trim().to_string(),
                segments,
                language: detected_lang,
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("Whisper task join error: {}", e))?
    }

    fn name(&self) -> &str {
        "local_whisper"
    }
}

/// Loads one independent Whisper context per worker.
pub struct WhisperLoader {
    model_path: PathBuf,
    default_language: Option<String>,
}

impl WhisperLoader {
    pub fn new(model_path: PathBuf, default_language: Option<String>) -> Self {
        Self {
            model_path,
            default_language,
        }
    }
}

#[async_trait]
impl ModelLoader for WhisperLoader {
    async fn load(&self, worker_index: usize) -> anyhow::Result<Arc<dyn AsrBackend>> {
        let path = self.model_path.to_string_lossy().into_owned();
        let language = self.default_language.clone();
        debug!(worker = worker_index, model = %path, "Loading model for worker");
        let backend = tokio::task::spawn_blocking(move || LocalWhisperBackend::new(&path, language))
            .await
            .map_err(|e| anyhow::anyhow!("Model load join error: {}", e))??;
        Ok(Arc::new(backend))
    }
}
