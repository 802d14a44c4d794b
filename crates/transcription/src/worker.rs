use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::asr::{AsrBackend, AsrRequest};
use crate::error::WorkerTaskError;
use crate::task::Envelope;

/// The shared task queue. Many workers pull from one receiver.
pub(crate) type SharedQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>;

/// Observable state of one worker position in the pool.
///
/// The slot outlives the worker task running in it, so a respawned worker
/// keeps its index and counters.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    loaded: AtomicBool,
    alive: AtomicBool,
    busy: AtomicBool,
    current_task: Mutex<Option<Uuid>>,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    restarts: AtomicU32,
    load_latency_ms: AtomicU64,
    abort: Mutex<Option<AbortHandle>>,
}

/// Point-in-time view of a [`WorkerSlot`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHealth {
    pub index: usize,
    pub loaded: bool,
    pub alive: bool,
    pub busy: bool,
    pub current_task: Option<Uuid>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub restarts: u32,
    pub load_latency_ms: u64,
}

impl WorkerSlot {
    pub(crate) fn new(index: usize, load_latency: Duration) -> Self {
        Self {
            index,
            loaded: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            current_task: Mutex::new(None),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
            load_latency_ms: AtomicU64::new(load_latency.as_millis() as u64),
            abort: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            index: self.index,
            loaded: self.is_loaded(),
            alive: self.is_alive(),
            busy: self.is_busy(),
            current_task: *self.current_task.lock(),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            load_latency_ms: self.load_latency_ms.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_abort(&self, handle: AbortHandle) {
        *self.abort.lock() = Some(handle);
    }

    /// Kills the worker task immediately, abandoning its current task.
    pub(crate) fn abort_worker(&self) {
        if let Some(handle) = self.abort.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
        self.loaded.store(false, Ordering::Release);
        self.finish();
    }

    pub(crate) fn mark_respawned(&self, load_latency: Duration) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.load_latency_ms
            .store(load_latency.as_millis() as u64, Ordering::Relaxed);
        self.loaded.store(true, Ordering::Release);
        self.alive.store(true, Ordering::Release);
    }

    fn begin(&self, task_id: Uuid) {
        *self.current_task.lock() = Some(task_id);
        self.busy.store(true, Ordering::Release);
    }

    fn finish(&self) {
        *self.current_task.lock() = None;
        self.busy.store(false, Ordering::Release);
    }
}

/// Clears the busy flag even if inference panics.
struct BusyGuard<'a>(&'a WorkerSlot);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// A long-lived pool worker owning exactly one loaded model.
///
/// Pull loop: wait for task → transcribe → reply, until shutdown is signalled
/// or the queue closes. Shutdown is only observed between tasks, so a
/// running task always finishes unless the worker is aborted.
pub(crate) struct Worker {
    slot: Arc<WorkerSlot>,
    backend: Arc<dyn AsrBackend>,
    queue: SharedQueue,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        slot: Arc<WorkerSlot>,
        backend: Arc<dyn AsrBackend>,
        queue: SharedQueue,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            slot,
            backend,
            queue,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            worker = self.slot.index,
            backend = %self.backend.name(),
            "Worker started"
        );

        loop {
            let envelope = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => break,
                next = next_envelope(&self.queue) => match next {
                    Some(e) => e,
                    None => break,
                },
            };
            self.process(envelope).await;
        }

        debug!(worker = self.slot.index, "Worker stopped");
    }

    async fn process(&self, envelope: Envelope) {
        if envelope.is_abandoned() {
            debug!(
                worker = self.slot.index,
                task_id = %envelope.task.id,
                "Skipping abandoned task"
            );
            return;
        }

        let Envelope {
            task,
            started,
            reply,
        } = envelope;
        let _ = started.send(self.slot.index);

        self.slot.begin(task.id);
        let _busy = BusyGuard(&self.slot);

        let request = AsrRequest {
            audio_path: task.audio_path.clone(),
            language_hint: task.language_hint.clone(),
        };

        let start = Instant::now();
        let result = self
            .backend
            .transcribe(request)
            .await
            .map_err(|e| WorkerTaskError::Inference(e.to_string()));
        let inference_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(r) => {
                self.slot.tasks_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker = self.slot.index,
                    session_id = %task.session_id,
                    segment = task.index,
                    inference_ms,
                    text_len = r.text.len(),
                    "Task completed"
                );
            }
            Err(e) => {
                self.slot.tasks_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker = self.slot.index,
                    session_id = %task.session_id,
                    segment = task.index,
                    error = %e,
                    "Task failed"
                );
            }
        }

        if reply.send(result).is_err() {
            debug!(
                worker = self.slot.index,
                segment = task.index,
                "Caller abandoned task, result discarded"
            );
        }
    }
}

async fn next_envelope(queue: &SharedQueue) -> Option<Envelope> {
    let mut rx = queue.lock().await;
    rx.recv().await
}
