use axum::{Json, extract::State};
use longform_transcription::MetricsSnapshot;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pool = state.service.pool().health();
    let status = if pool.healthy { "ok" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "pooled_enabled": state.settings.pipeline.pooled_enabled,
        "pool": pool,
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.service.metrics())
}
