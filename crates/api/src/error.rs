use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use longform_transcription::TranscribeError;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The caller's input cannot be processed; retrying will not help.
    Validation { kind: &'static str, message: String },
    /// Temporarily degraded; safe to retry.
    Unavailable { kind: &'static str, message: String },
    Timeout(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            ApiError::Validation { message, .. } => write!(f, "Validation: {message}"),
            ApiError::Unavailable { message, .. } => write!(f, "Unavailable: {message}"),
            ApiError::Timeout(msg) => write!(f, "Timeout: {msg}"),
            ApiError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, retryable) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, false),
            ApiError::Validation { kind, message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, kind, message, false)
            }
            ApiError::Unavailable { kind, message } => {
                (StatusCode::SERVICE_UNAVAILABLE, kind, message, true)
            }
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg, true),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg, false)
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            retryable,
        };

        (status, Json(body)).into_response()
    }
}

impl From<TranscribeError> for ApiError {
    fn from(err: TranscribeError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            TranscribeError::RequestTimeout(_) => ApiError::Timeout(message),
            TranscribeError::Session(_) => ApiError::Internal(message),
            ref e if e.is_input_error() => ApiError::Validation { kind, message },
            _ => ApiError::Unavailable { kind, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use longform_transcription::{AcquisitionError, ChunkingError, PoolError};

    use super::*;

    fn status(err: TranscribeError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_input_errors_map_to_422() {
        assert_eq!(
            status(AcquisitionError::NotFound("x".into()).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(ChunkingError::EmptyWaveform(PathBuf::from("a.wav")).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_degraded_errors_map_to_503() {
        assert_eq!(
            status(PoolError::NotReady("failed".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(AcquisitionError::Network("reset".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_request_timeout_maps_to_504() {
        assert_eq!(
            status(TranscribeError::RequestTimeout(Duration::from_secs(5))),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
