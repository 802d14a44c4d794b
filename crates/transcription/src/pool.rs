use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use longform_config::PoolSettings;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::asr::{AsrBackend, ModelLoader};
use crate::error::PoolError;
use crate::task::{Envelope, Task, TaskHandle};
use crate::worker::{SharedQueue, Worker, WorkerHealth, WorkerSlot};

/// Lifecycle state of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Idle,
    Starting,
    Ready,
    Failed,
    ShuttingDown,
    Stopped,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

/// Outcome of a successful [`WorkerPool::start`].
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub worker_count: usize,
    /// Model load latency of each worker, by index.
    pub load_latency_ms: Vec<u64>,
    pub elapsed_ms: u64,
}

/// Snapshot reported to health checks.
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub state: PoolState,
    pub healthy: bool,
    pub worker_count: usize,
    pub loaded_count: usize,
    pub alive_count: usize,
    pub busy_count: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub workers: Vec<WorkerHealth>,
}

/// State shared between the pool handle and its worker supervisors.
struct Shared {
    state: RwLock<PoolState>,
    sender: RwLock<Option<mpsc::Sender<Envelope>>>,
    slots: RwLock<Vec<Arc<WorkerSlot>>>,
    min_usable: usize,
}

impl Shared {
    fn state(&self) -> PoolState {
        *self.state.read()
    }

    fn set_state(&self, state: PoolState) {
        *self.state.write() = state;
    }

    fn alive_count(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_alive()).count()
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    supervisors: JoinSet<()>,
    queue: SharedQueue,
}

/// Everything a supervisor needs to run, watch and respawn one worker slot.
struct Supervisor {
    slot: Arc<WorkerSlot>,
    shared: Arc<Shared>,
    queue: SharedQueue,
    shutdown: watch::Receiver<bool>,
    loader: Arc<dyn ModelLoader>,
    load_timeout: Duration,
    respawn: bool,
}

/// Persistent pool of model-preloaded workers behind one bounded task queue.
///
/// Construct exactly one pool per process and share it by `Arc`; every
/// request submits through the same handle. Nothing is spawned until
/// [`start`](Self::start) is called, and [`shutdown`](Self::shutdown) must be
/// called before the process exits.
pub struct WorkerPool {
    settings: PoolSettings,
    loader: Arc<dyn ModelLoader>,
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl WorkerPool {
    pub fn new(settings: PoolSettings, loader: Arc<dyn ModelLoader>) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(PoolState::Idle),
            sender: RwLock::new(None),
            slots: RwLock::new(Vec::new()),
            min_usable: settings.min_usable_workers.max(1),
        });
        Self {
            settings,
            loader,
            shared,
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    /// Spawns `worker_count` workers and waits until every one of them has
    /// loaded its model. Any load failure or timeout fails the whole start and
    /// leaves the pool in [`PoolState::Failed`].
    pub async fn start(&self, worker_count: usize) -> Result<StartReport, PoolError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(PoolError::StartFailed("pool is already running".to_string()));
        }
        if worker_count == 0 {
            self.shared.set_state(PoolState::Failed);
            return Err(PoolError::StartFailed(
                "worker_count must be at least 1".to_string(),
            ));
        }

        self.shared.set_state(PoolState::Starting);
        let load_timeout = self.settings.startup_timeout();
        info!(
            worker_count,
            timeout_secs = load_timeout.as_secs_f64(),
            "Starting worker pool"
        );

        let started = Instant::now();
        let loads = (0..worker_count).map(|index| {
            let loader = Arc::clone(&self.loader);
            async move { load_model(loader.as_ref(), index, load_timeout).await }
        });
        let results = join_all(loads).await;

        let mut loaded = Vec::with_capacity(worker_count);
        let mut failures = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(pair) => loaded.push(pair),
                Err(reason) => {
                    error!(worker = index, error = %reason, "Worker failed to load model");
                    failures.push(format!("worker {index}: {reason}"));
                }
            }
        }
        if !failures.is_empty() {
            self.shared.set_state(PoolState::Failed);
            return Err(PoolError::StartFailed(failures.join("; ")));
        }

        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut supervisors = JoinSet::new();
        let mut slots = Vec::with_capacity(worker_count);
        let mut load_latency_ms = Vec::with_capacity(worker_count);
        for (index, (backend, latency)) in loaded.into_iter().enumerate() {
            let slot = Arc::new(WorkerSlot::new(index, latency));
            load_latency_ms.push(latency.as_millis() as u64);
            slots.push(Arc::clone(&slot));
            let supervisor = Supervisor {
                slot,
                shared: Arc::clone(&self.shared),
                queue: Arc::clone(&queue),
                shutdown: shutdown_rx.clone(),
                loader: Arc::clone(&self.loader),
                load_timeout,
                respawn: self.settings.respawn_on_crash,
            };
            supervisors.spawn(supervisor.run(backend));
        }

        *self.shared.slots.write() = slots;
        *self.shared.sender.write() = Some(tx);
        self.shared.set_state(PoolState::Ready);
        *running = Some(Running {
            shutdown_tx,
            supervisors,
            queue,
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(worker_count, elapsed_ms, ?load_latency_ms, "Worker pool ready");
        Ok(StartReport {
            worker_count,
            load_latency_ms,
            elapsed_ms,
        })
    }

    /// Enqueues a task. Waits only when the queue is full.
    pub async fn submit(&self, task: Task) -> Result<TaskHandle, PoolError> {
        self.ensure_usable()?;
        let sender = self
            .shared
            .sender
            .read()
            .clone()
            .ok_or(PoolError::QueueClosed)?;

        let (envelope, handle) = Envelope::new(task);
        sender
            .send(envelope)
            .await
            .map_err(|_| PoolError::QueueClosed)?;
        Ok(handle)
    }

    /// Stops accepting tasks and stops every worker.
    ///
    /// With `wait_for_inflight`, running tasks get up to the configured grace
    /// period to finish; otherwise workers are aborted at once. Tasks still
    /// queued resolve as [`WorkerTaskError::PoolShutdown`](crate::WorkerTaskError::PoolShutdown).
    pub async fn shutdown(&self, wait_for_inflight: bool) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        self.shared.set_state(PoolState::ShuttingDown);
        info!(wait_for_inflight, "Shutting down worker pool");

        self.shared.sender.write().take();
        let _ = running.shutdown_tx.send(true);
        let dropped = drain_queue(&running.queue).await;
        if dropped > 0 {
            debug!(dropped, "Dropped queued tasks on shutdown");
        }

        let mut supervisors = running.supervisors;
        if wait_for_inflight {
            let grace = self.settings.shutdown_grace();
            let drained = tokio::time::timeout(grace, async {
                while supervisors.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    grace_secs = grace.as_secs_f64(),
                    "Grace period elapsed, aborting busy workers"
                );
                self.abort_workers();
            }
        } else {
            self.abort_workers();
        }
        while supervisors.join_next().await.is_some() {}

        self.shared.set_state(PoolState::Stopped);
        info!("Worker pool stopped");
    }

    /// Stops the pool if it is running, then starts it again.
    pub async fn restart(&self, worker_count: usize) -> Result<StartReport, PoolError> {
        self.shutdown(true).await;
        self.start(worker_count).await
    }

    /// Ready and at least `min_usable_workers` workers alive.
    pub fn is_healthy(&self) -> bool {
        self.shared.state() == PoolState::Ready
            && self.shared.alive_count() >= self.shared.min_usable
    }

    pub fn health(&self) -> PoolHealth {
        let workers: Vec<WorkerHealth> = self
            .shared
            .slots
            .read()
            .iter()
            .map(|s| s.health())
            .collect();
        let (queue_depth, queue_capacity) = match self.shared.sender.read().as_ref() {
            Some(tx) => (tx.max_capacity() - tx.capacity(), tx.max_capacity()),
            None => (0, 0),
        };
        PoolHealth {
            state: self.shared.state(),
            healthy: self.is_healthy(),
            worker_count: workers.len(),
            loaded_count: workers.iter().filter(|w| w.loaded).count(),
            alive_count: workers.iter().filter(|w| w.alive).count(),
            busy_count: workers.iter().filter(|w| w.busy).count(),
            queue_depth,
            queue_capacity,
            workers,
        }
    }

    fn ensure_usable(&self) -> Result<(), PoolError> {
        let state = self.shared.state();
        if state != PoolState::Ready {
            return Err(PoolError::NotReady(state.as_str().to_string()));
        }
        let alive = self.shared.alive_count();
        if alive < self.shared.min_usable {
            return Err(PoolError::Degraded {
                alive,
                configured: self.shared.slots.read().len(),
            });
        }
        Ok(())
    }

    fn abort_workers(&self) {
        for slot in self.shared.slots.read().iter() {
            slot.abort_worker();
        }
    }
}

impl Supervisor {
    /// Runs the slot's worker, restarting it after a crash when respawn is on.
    async fn run(self, mut backend: Arc<dyn AsrBackend>) {
        let index = self.slot.index();
        loop {
            let worker = Worker::new(
                Arc::clone(&self.slot),
                backend,
                Arc::clone(&self.queue),
                self.shutdown.clone(),
            );
            let handle = tokio::spawn(worker.run());
            self.slot.set_abort(handle.abort_handle());

            match handle.await {
                Ok(()) => {
                    self.slot.mark_dead();
                    return;
                }
                Err(e) if e.is_cancelled() => {
                    debug!(worker = index, "Worker aborted");
                    self.slot.mark_dead();
                    return;
                }
                Err(e) => {
                    error!(worker = index, error = %e, "Worker crashed");
                    self.slot.mark_dead();
                }
            }

            if !self.respawn || *self.shutdown.borrow() {
                self.on_worker_lost().await;
                return;
            }

            match load_model(self.loader.as_ref(), index, self.load_timeout).await {
                Ok((fresh, latency)) => {
                    self.slot.mark_respawned(latency);
                    info!(
                        worker = index,
                        load_ms = latency.as_millis() as u64,
                        "Worker respawned"
                    );
                    backend = fresh;
                }
                Err(reason) => {
                    error!(worker = index, error = %reason, "Worker respawn failed");
                    self.on_worker_lost().await;
                    return;
                }
            }
        }
    }

    async fn on_worker_lost(&self) {
        let alive = self.shared.alive_count();
        let configured = self.shared.slots.read().len();
        warn!(
            worker = self.slot.index(),
            alive, configured, "Worker pool degraded"
        );

        if alive == 0 && self.shared.state() == PoolState::Ready {
            // Nobody is left to pull queued tasks; fail them now instead of
            // letting their callers wait for the request timeout.
            self.shared.set_state(PoolState::Failed);
            self.shared.sender.write().take();
            let dropped = drain_queue(&self.queue).await;
            error!(dropped, "All workers lost, pool marked failed");
        }
    }
}

async fn load_model(
    loader: &dyn ModelLoader,
    index: usize,
    timeout: Duration,
) -> Result<(Arc<dyn AsrBackend>, Duration), String> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, loader.load(index)).await {
        Ok(Ok(backend)) => {
            let latency = start.elapsed();
            debug!(
                worker = index,
                backend = %backend.name(),
                load_ms = latency.as_millis() as u64,
                "Model loaded"
            );
            Ok((backend, latency))
        }
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err(format!("model load timed out after {timeout:?}")),
    }
}

/// Closes the queue and drops everything still in it.
async fn drain_queue(queue: &SharedQueue) -> usize {
    let mut rx = queue.lock().await;
    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
