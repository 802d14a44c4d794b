use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use longform_api::{build_router, state::AppState};
use longform_config::{LoggingSettings, Settings};
use longform_transcription::{
    Collaborators, ModelLoader, RoutingFetcher, SessionManager, SessionSweeper,
    TranscriptionService, WorkerPool, pipeline::AutoConverter,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Arc::new(Settings::load().context("Failed to load settings")?);
    init_tracing(&settings.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting longform transcription service");

    let sessions = Arc::new(SessionManager::new(settings.session.root_dir.clone()));
    match sessions.sweep_stale_sessions(Duration::ZERO).await {
        Ok(report) if !report.removed.is_empty() => {
            info!(removed = report.removed.len(), "Reclaimed leftover session workspaces");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Startup session sweep failed"),
    }

    let loader = model_loader(&settings)?;
    let pool = Arc::new(WorkerPool::new(settings.pool.clone(), loader.clone()));
    if settings.pipeline.pooled_enabled {
        match pool.start(settings.pool.worker_count).await {
            Ok(report) => info!(
                workers = report.worker_count,
                elapsed_ms = report.elapsed_ms,
                "Worker pool ready"
            ),
            Err(e) => error!(error = %e, "Worker pool failed to start, serving single-worker only"),
        }
    } else {
        info!("Pooled execution disabled, serving single-worker only");
    }

    let sweeper = SessionSweeper::start(
        sessions.clone(),
        settings.session.sweep_interval(),
        settings.session.max_age(),
    )
    .await
    .context("Failed to start session sweeper")?;

    let service = Arc::new(TranscriptionService::new(
        &settings,
        sessions,
        pool.clone(),
        Collaborators {
            fetcher: Arc::new(RoutingFetcher::new(&settings.acquisition)?),
            converter: Arc::new(AutoConverter::default()),
            single_loader: loader,
        },
    ));

    let app = build_router(AppState::new(settings.clone(), service));
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down worker pool");
    pool.shutdown(true).await;
    if let Err(e) = sweeper.shutdown().await {
        warn!(error = %e, "Session sweeper did not stop cleanly");
    }
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

#[cfg(feature = "local-whisper")]
fn model_loader(settings: &Settings) -> Result<Arc<dyn ModelLoader>> {
    use longform_transcription::asr::local_whisper::WhisperLoader;

    match settings.model.backend.as_str() {
        "local_whisper" => {
            let path = settings
                .model
                .model_path
                .clone()
                .context("model.model_path is required for the local_whisper backend")?;
            Ok(Arc::new(WhisperLoader::new(path, settings.model.language.clone())))
        }
        other => anyhow::bail!("Unknown ASR backend '{other}'"),
    }
}

#[cfg(not(feature = "local-whisper"))]
fn model_loader(settings: &Settings) -> Result<Arc<dyn ModelLoader>> {
    warn!(
        backend = %settings.model.backend,
        "Built without an ASR backend, enable the local-whisper feature"
    );
    Ok(Arc::new(NoBackendLoader))
}

#[cfg(not(feature = "local-whisper"))]
struct NoBackendLoader;

#[cfg(not(feature = "local-whisper"))]
#[async_trait::async_trait]
impl ModelLoader for NoBackendLoader {
    async fn load(
        &self,
        _worker_index: usize,
    ) -> Result<Arc<dyn longform_transcription::AsrBackend>> {
        anyhow::bail!("built without an ASR backend; enable the local-whisper feature")
    }
}
