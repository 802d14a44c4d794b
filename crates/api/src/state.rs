use std::sync::Arc;

use longform_config::Settings;
use longform_transcription::TranscriptionService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: Arc<TranscriptionService>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, service: Arc<TranscriptionService>) -> Self {
        Self { settings, service }
    }
}
