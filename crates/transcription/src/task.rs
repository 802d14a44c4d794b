//! Typed task/result envelopes exchanged between requests and pool workers.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::asr::TranscriptionResult;
use crate::error::WorkerTaskError;

/// One segment to transcribe, plus routing metadata.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub session_id: String,
    pub index: usize,
    pub audio_path: PathBuf,
    pub language_hint: Option<String>,
}

impl Task {
    pub fn new(
        session_id: impl Into<String>,
        index: usize,
        audio_path: PathBuf,
        language_hint: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            index,
            audio_path,
            language_hint,
        }
    }
}

pub type TaskResult = Result<TranscriptionResult, WorkerTaskError>;

/// What travels through the queue: the task and the two reply channels.
pub(crate) struct Envelope {
    pub task: Task,
    /// Fired with the worker index once a worker picks the task up.
    pub started: oneshot::Sender<usize>,
    pub reply: oneshot::Sender<TaskResult>,
}

impl Envelope {
    pub fn new(task: Task) -> (Self, TaskHandle) {
        let (started_tx, started_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = TaskHandle {
            task_id: task.id,
            index: task.index,
            started: started_rx,
            reply: reply_rx,
        };
        (
            Self {
                task,
                started: started_tx,
                reply: reply_tx,
            },
            handle,
        )
    }

    /// The submitter dropped its handle; nobody will read the result.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// Resolves to exactly one [`TaskResult`] for a submitted task.
///
/// Dropping the handle abandons the task: a worker that has not picked it up
/// yet skips it, and a worker already running it discards the result.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: Uuid,
    index: usize,
    started: oneshot::Receiver<usize>,
    reply: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Waits for the result. `timeout` starts counting when a worker picks the
    /// task up, so time spent queued behind other requests is not charged.
    pub async fn wait(self, timeout: Duration) -> TaskResult {
        let Self { started, reply, .. } = self;

        if started.await.is_err() {
            // Envelope dropped while still queued
            return Err(WorkerTaskError::PoolShutdown);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WorkerTaskError::WorkerLost),
            Err(_) => Err(WorkerTaskError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("s", 0, PathBuf::from("segment_00000.wav"), None)
    }

    #[tokio::test]
    async fn test_handle_resolves_with_reply() {
        let (envelope, handle) = Envelope::new(task());
        envelope.started.send(0).unwrap();
        envelope
            .reply
            .send(Ok(TranscriptionResult {
                text: "hello".into(),
                ..Default::default()
            }))
            .unwrap();

        let result = handle.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.text, "hello");
    }

    #[tokio::test]
    async fn test_dropped_while_queued_is_shutdown() {
        let (envelope, handle) = Envelope::new(task());
        drop(envelope);
        assert_eq!(
            handle.wait(Duration::from_secs(1)).await,
            Err(WorkerTaskError::PoolShutdown)
        );
    }

    #[tokio::test]
    async fn test_dropped_after_start_is_worker_lost() {
        let (envelope, handle) = Envelope::new(task());
        let Envelope { started, reply, .. } = envelope;
        started.send(1).unwrap();
        drop(reply);
        assert_eq!(
            handle.wait(Duration::from_secs(1)).await,
            Err(WorkerTaskError::WorkerLost)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_from_start() {
        let (envelope, handle) = Envelope::new(task());
        envelope.started.send(0).unwrap();
        let _keep = envelope.reply;
        assert_eq!(
            handle.wait(Duration::from_secs(5)).await,
            Err(WorkerTaskError::Timeout(Duration::from_secs(5)))
        );
    }

    #[test]
    fn test_abandoned_when_handle_dropped() {
        let (envelope, handle) = Envelope::new(task());
        assert!(!envelope.is_abandoned());
        drop(handle);
        assert!(envelope.is_abandoned());
    }
}
