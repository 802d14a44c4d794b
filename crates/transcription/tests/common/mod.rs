#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use longform_config::Settings;
use longform_transcription::pipeline::AudioConverter;
use longform_transcription::{
    AsrBackend, AsrRequest, Collaborators, ConversionError, LocalFileFetcher, ModelLoader,
    SessionManager, TimedText, TranscriptionResult, TranscriptionService, WorkerPool,
};
use parking_lot::Mutex;
use rand::Rng;

/// Sample rate of test fixtures. Low so that 15-minute sources stay small.
pub const FIXTURE_RATE: u32 = 100;

/// Scripted behaviour shared by every backend a loader hands out.
#[derive(Default)]
pub struct Script {
    /// Segment index → number of leading attempts that fail.
    pub fail_first: HashMap<usize, u32>,
    /// Segments whose first attempt panics the worker.
    pub panic_first: HashSet<usize>,
    /// Random per-call latency range in milliseconds.
    pub latency_ms: Option<(u64, u64)>,
    /// Whole-waveform (single-worker) calls fail.
    pub single_fails: bool,
    pub attempts: Mutex<HashMap<usize, u32>>,
    pub calls: AtomicUsize,
}

impl Script {
    pub fn attempts(&self, index: usize) -> u32 {
        self.attempts.lock().get(&index).copied().unwrap_or(0)
    }
}

pub struct ScriptedBackend {
    script: Arc<Script>,
}

#[async_trait]
impl AsrBackend for ScriptedBackend {
    async fn transcribe(&self, request: AsrRequest) -> anyhow::Result<TranscriptionResult> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((lo, hi)) = self.script.latency_ms {
            let ms = rand::rng().random_range(lo..=hi);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let reader = hound::WavReader::open(&request.audio_path)?;
        let duration = reader.duration() as f64 / reader.spec().sample_rate as f64;
        let stem = request
            .audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let Some(index) = stem
            .strip_prefix("segment_")
            .and_then(|n| n.parse::<usize>().ok())
        else {
            if self.script.single_fails {
                anyhow::bail!("single model unavailable");
            }
            return Ok(spoken("whole", duration));
        };

        let attempt = {
            let mut attempts = self.script.attempts.lock();
            let n = attempts.entry(index).or_insert(0);
            *n += 1;
            *n
        };
        if attempt == 1 && self.script.panic_first.contains(&index) {
            panic!("worker crashed on segment {index}");
        }
        if attempt <= self.script.fail_first.get(&index).copied().unwrap_or(0) {
            anyhow::bail!("scripted failure on segment {index}");
        }
        Ok(spoken(&format!("seg{index}"), duration))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn spoken(text: &str, duration: f64) -> TranscriptionResult {
    TranscriptionResult {
        text: text.to_string(),
        segments: vec![TimedText {
            start: 0.0,
            end: duration,
            text: text.to_string(),
        }],
        language: Some("en".to_string()),
    }
}

pub struct ScriptedLoader {
    pub script: Arc<Script>,
    /// This worker index sleeps for `load_delay` while `slow` is set.
    pub slow_worker: Option<usize>,
    pub slow: AtomicBool,
    pub load_delay: Duration,
    pub loads: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            slow_worker: None,
            slow: AtomicBool::new(false),
            load_delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    async fn load(&self, worker_index: usize) -> anyhow::Result<Arc<dyn AsrBackend>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.slow_worker == Some(worker_index) && self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(self.load_delay).await;
        }
        Ok(Arc::new(ScriptedBackend {
            script: Arc::clone(&self.script),
        }))
    }
}

/// Fixtures are already normalized; conversion is a copy.
pub struct CopyConverter;

#[async_trait]
impl AudioConverter for CopyConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

pub fn settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.session.root_dir = root.join("sessions");
    settings.pool.worker_count = 2;
    settings.pool.startup_timeout_secs = 1;
    settings.pool.shutdown_grace_secs = 5;
    settings.chunking.chunk_duration_secs = 120.0;
    settings.chunking.overlap_secs = 0.0;
    settings.chunking.max_parallel_slices = 2;
    settings.pipeline.pooled_threshold_secs = 300.0;
    settings.pipeline.task_timeout_secs = 5;
    settings.pipeline.request_timeout_secs = 30;
    settings
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub settings: Settings,
    pub script: Arc<Script>,
    pub loader: Arc<ScriptedLoader>,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<WorkerPool>,
    pub service: TranscriptionService,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        Self::build(script, |_| {}, |_| {})
    }

    pub fn build(
        script: Script,
        tweak_settings: impl FnOnce(&mut Settings),
        tweak_loader: impl FnOnce(&mut ScriptedLoader),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        tweak_settings(&mut settings);

        let script = Arc::new(script);
        let mut loader = ScriptedLoader::new(Arc::clone(&script));
        tweak_loader(&mut loader);
        let loader = Arc::new(loader);

        let sessions = Arc::new(SessionManager::new(&settings.session.root_dir));
        let pool = Arc::new(WorkerPool::new(
            settings.pool.clone(),
            Arc::clone(&loader) as Arc<dyn ModelLoader>,
        ));
        let service = TranscriptionService::new(
            &settings,
            Arc::clone(&sessions),
            Arc::clone(&pool),
            Collaborators {
                fetcher: Arc::new(LocalFileFetcher),
                converter: Arc::new(CopyConverter),
                single_loader: Arc::clone(&loader) as Arc<dyn ModelLoader>,
            },
        );

        Self {
            dir,
            settings,
            script,
            loader,
            sessions,
            pool,
            service,
        }
    }

    pub async fn start_pool(&self) {
        self.pool
            .start(self.settings.pool.worker_count)
            .await
            .unwrap();
    }

    /// Writes a silent fixture of `secs` seconds and returns its path.
    pub fn source(&self, name: &str, secs: f64) -> String {
        let dir = self.dir.path().join("sources");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}.wav"));
        write_silence(&path, secs, FIXTURE_RATE);
        path.to_string_lossy().to_string()
    }

    /// Session directories left on disk.
    pub fn leftover_sessions(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.settings.session.root_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn write_silence(path: &Path, secs: f64, rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (secs * rate as f64).round() as u64;
    for _ in 0..frames {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}
