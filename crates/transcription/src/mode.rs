//! Execution mode selection.

use longform_config::PipelineSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Whole waveform in one pass on the single-worker model.
    Single,
    /// Chunked and fanned out over the worker pool.
    Pooled,
}

/// Caller preference. `Auto` applies the duration threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeOverride {
    #[default]
    Auto,
    Single,
    Pooled,
}

/// Picks pooled execution for long sources when the pool can take them.
///
/// Pooled requires pooled mode to be enabled and the pool to be healthy, even
/// when the caller asks for it; everything else runs single-worker.
pub fn select_mode(
    estimated_duration: f64,
    pool_healthy: bool,
    settings: &PipelineSettings,
    requested: ModeOverride,
) -> Mode {
    if !settings.pooled_enabled || !pool_healthy {
        return Mode::Single;
    }
    match requested {
        ModeOverride::Single => Mode::Single,
        ModeOverride::Pooled => Mode::Pooled,
        ModeOverride::Auto if estimated_duration >= settings.pooled_threshold_secs => Mode::Pooled,
        ModeOverride::Auto => Mode::Single,
    }
}
