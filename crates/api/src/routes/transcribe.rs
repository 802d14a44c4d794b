use axum::{Json, extract::State};
use longform_transcription::{ModeOverride, TranscribeOptions, TranscriptResult};
use serde::Deserialize;
use tracing::info;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    /// Local path, `file://` or `http(s)://` URL.
    pub source: String,
    pub language: Option<String>,
    #[serde(default)]
    pub mode: ModeOverride,
    pub caller: Option<String>,
}

pub async fn transcribe(
    State(state): State<AppState>,
    Json(body): Json<TranscribeRequest>,
) -> Result<Json<TranscriptResult>, ApiError> {
    let source = body.source.trim();
    if source.is_empty() {
        return Err(ApiError::BadRequest("source must not be empty".to_string()));
    }

    info!(source, mode = ?body.mode, "Transcription requested");
    let options = TranscribeOptions {
        language: body.language.filter(|l| !l.is_empty()),
        mode: body.mode,
        caller: body.caller,
    };
    let result = state.service.transcribe(source, options).await?;
    Ok(Json(result))
}
