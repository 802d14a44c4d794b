use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides, e.g. `LONGFORM__POOL__WORKER_COUNT=4`.
pub const ENV_PREFIX: &str = "LONGFORM";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub pool: PoolSettings,
    pub session: SessionSettings,
    pub chunking: ChunkingSettings,
    pub pipeline: PipelineSettings,
    pub acquisition: AcquisitionSettings,
    pub model: ModelSettings,
}

impl Settings {
    /// Loads settings from `config/default.toml`, `config/local.toml` and
    /// `LONGFORM__*` environment variables, in that order of precedence.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let settings = Config::builder()
            .add_source(File::from(dir.join("default.toml")).required(false))
            .add_source(File::from(dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info,longform_transcription=debug,longform_api=debug".to_string(),
            json: false,
        }
    }
}

/// Persistent worker pool sizing and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of workers, each holding its own model instance.
    pub worker_count: usize,
    /// How long every worker may take to load its model during `start`.
    pub startup_timeout_secs: u64,
    /// Bounded task queue capacity; `submit` waits when it is full.
    pub queue_capacity: usize,
    /// Grace period for in-flight tasks on shutdown.
    pub shutdown_grace_secs: u64,
    /// Reload the model and restart a worker slot after a crash.
    pub respawn_on_crash: bool,
    /// Below this many live workers the pool reports itself unhealthy.
    pub min_usable_workers: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            startup_timeout_secs: 120,
            queue_capacity: 64,
            shutdown_grace_secs: 30,
            respawn_on_crash: false,
            min_usable_workers: 1,
        }
    }
}

impl PoolSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Directory under which every request gets its own workspace.
    pub root_dir: PathBuf,
    /// Sessions older than this (and not active) are reclaimed by the sweeper.
    pub max_age_secs: u64,
    /// Interval of the background sweep.
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("longform-sessions"),
            max_age_secs: 6 * 60 * 60,
            sweep_interval_secs: 15 * 60,
        }
    }
}

impl SessionSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum duration of one segment in seconds.
    pub chunk_duration_secs: f64,
    /// Overlap between consecutive segments in seconds (0 disables overlap).
    pub overlap_secs: f64,
    /// Upper bound on concurrent slice extractions. 0 = available parallelism (capped at 8).
    pub max_parallel_slices: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 120.0,
            overlap_secs: 0.0,
            max_parallel_slices: 0,
        }
    }
}

impl ChunkingSettings {
    pub fn parallelism(&self) -> usize {
        if self.max_parallel_slices > 0 {
            return self.max_parallel_slices;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().min(8))
            .unwrap_or(2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Administrative switch for pooled execution.
    pub pooled_enabled: bool,
    /// Sources at least this long (seconds) are processed in pooled mode.
    pub pooled_threshold_secs: f64,
    /// How long a worker may spend on a single segment.
    pub task_timeout_secs: u64,
    /// Upper bound on a whole request, pipeline included.
    pub request_timeout_secs: u64,
    /// Attempts per segment before it is merged as degraded.
    pub max_task_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pooled_enabled: true,
            pooled_threshold_secs: 300.0,
            task_timeout_secs: 600,
            request_timeout_secs: 2 * 60 * 60,
            max_task_attempts: 2,
        }
    }
}

impl PipelineSettings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Longest accepted source in seconds.
    pub max_duration_secs: f64,
    /// Largest accepted source in bytes.
    pub max_size_bytes: u64,
    /// Timeout for remote downloads.
    pub http_timeout_secs: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            max_duration_secs: 4.0 * 60.0 * 60.0,
            max_size_bytes: 2 * 1024 * 1024 * 1024,
            http_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// ASR backend name, e.g. "local_whisper".
    pub backend: String,
    /// Path to the model file loaded by every worker.
    pub model_path: Option<PathBuf>,
    /// Default language hint (ISO 639-1). None = auto-detect.
    pub language: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: "local_whisper".to_string(),
            model_path: None,
            language: None,
        }
    }
}
