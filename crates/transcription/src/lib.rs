pub mod acquisition;
pub mod asr;
pub mod chunk;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod mode;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod service;
pub mod session;
pub mod single;
pub mod task;
pub mod transcript;
mod worker;

pub use acquisition::{
    FetchConstraints, FetchedSource, HttpFetcher, LocalFileFetcher, RoutingFetcher, SourceFetcher,
};
pub use asr::{AsrBackend, AsrRequest, ModelLoader, TimedText, TranscriptionResult};
pub use chunk::{ChunkPreparer, Segment};
pub use error::{
    AcquisitionError, ChunkingError, ConversionError, PoolError, SessionError, TranscribeError,
    WorkerTaskError,
};
pub use merge::{DegradedSegment, SegmentOutcome};
pub use metrics::MetricsSnapshot;
pub use mode::{Mode, ModeOverride, select_mode};
pub use orchestrator::{Orchestrator, RequestState};
pub use pool::{PoolHealth, PoolState, StartReport, WorkerPool};
pub use service::{Collaborators, TranscriptionService};
pub use session::{
    Session, SessionLease, SessionManager, SessionStatus, SessionSweeper, SweepReport,
};
pub use task::{Task, TaskHandle, TaskResult};
pub use transcript::{StageTimings, TranscribeOptions, TranscriptResult};
pub use worker::WorkerHealth;
