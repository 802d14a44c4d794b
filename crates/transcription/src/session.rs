//! Per-request workspace isolation.
//!
//! Every inbound request gets its own directory tree under the sessions root:
//!
//! ```text
//! <root>/<session_id>/acquisition   downloaded source
//! <root>/<session_id>/segments      normalized waveform + sliced segments
//! <root>/<session_id>/results       anything a collaborator wants to persist
//! ```
//!
//! Session ids combine a millisecond timestamp, a random token and a hash of
//! the caller fingerprint, so concurrent requests never collide.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::error::SessionError;

const ACQUISITION_DIR: &str = "acquisition";
const SEGMENTS_DIR: &str = "segments";
const RESULTS_DIR: &str = "results";

const TOKEN_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completing,
    Released,
}

/// Handle to one isolated workspace. Owned by the request that created it.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    root: PathBuf,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn acquisition_dir(&self) -> PathBuf {
        self.root.join(ACQUISITION_DIR)
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join(SEGMENTS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    created_at: DateTime<Utc>,
    status: SessionStatus,
}

/// Summary of one tracked session, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub skipped_active: usize,
}

/// Allocates, tracks and reclaims session workspaces.
pub struct SessionManager {
    root: PathBuf,
    sessions: DashMap<String, SessionEntry>,
}

impl SessionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh workspace tree and registers it as active.
    pub async fn create_session(&self, caller_fingerprint: &str) -> Result<Session, SessionError> {
        let created_at = Utc::now();
        let id = session_id(created_at, caller_fingerprint);
        let root = self.root.join(&id);

        for sub in [ACQUISITION_DIR, SEGMENTS_DIR, RESULTS_DIR] {
            let path = root.join(sub);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| SessionError::Create { path, source })?;
        }

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                created_at,
                status: SessionStatus::Active,
            },
        );
        debug!(session_id = %id, "Session created");

        Ok(Session {
            id,
            root,
            created_at,
        })
    }

    /// Marks a session as finishing; it is no longer considered active by the sweeper.
    pub fn mark_completing(&self, session: &Session) {
        if let Some(mut entry) = self.sessions.get_mut(&session.id) {
            entry.status = SessionStatus::Completing;
        }
    }

    /// Removes the session's workspace. Idempotent.
    pub async fn release_session(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(mut entry) = self.sessions.get_mut(&session.id) {
            entry.status = SessionStatus::Released;
        }

        remove_tree(&session.root).await?;
        self.sessions.remove(&session.id);
        debug!(session_id = %session.id, "Session released");
        Ok(())
    }

    pub fn status(&self, id: &str) -> Option<SessionStatus> {
        self.sessions.get(id).map(|e| e.status)
    }

    /// Number of sessions that are not yet released.
    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.status != SessionStatus::Released)
            .count()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|e| SessionInfo {
                id: e.key().clone(),
                created_at: e.created_at,
                status: e.status,
            })
            .collect()
    }

    /// Releases every session older than `max_age` that is not active.
    ///
    /// Directories under the root that this process does not track (leftovers
    /// of a crashed process) count as not active.
    pub async fn sweep_stale_sessions(&self, max_age: Duration) -> Result<SweepReport, SessionError> {
        let mut report = SweepReport::default();

        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(source) => {
                return Err(SessionError::Scan {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let now = Utc::now();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(source) => {
                    return Err(SessionError::Scan {
                        path: self.root.clone(),
                        source,
                    });
                }
            };
            let path = entry.path();
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            let tracked = self.sessions.get(&id).map(|e| (e.created_at, e.status));
            let (created_at, status) = match tracked {
                Some((created_at, status)) => (created_at, Some(status)),
                None => (created_at_of(&id, &path).await, None),
            };

            if status == Some(SessionStatus::Active) {
                report.skipped_active += 1;
                continue;
            }

            let age = now.signed_duration_since(created_at).to_std().unwrap_or_default();
            if age < max_age {
                continue;
            }

            match remove_tree(&path).await {
                Ok(()) => {
                    self.sessions.remove(&id);
                    report.removed.push(id);
                }
                Err(e) => warn!(error = %e, "Failed to reclaim stale session"),
            }
        }

        if !report.removed.is_empty() {
            info!(
                removed = report.removed.len(),
                skipped_active = report.skipped_active,
                "Stale sessions reclaimed"
            );
        }
        Ok(report)
    }
}

/// Owned claim on a session that releases it even when the request future is
/// dropped before reaching [`release`](Self::release).
pub struct SessionLease {
    manager: Arc<SessionManager>,
    session: Session,
    released: bool,
}

impl SessionLease {
    /// Creates a session on `manager` and wraps it in a lease.
    pub async fn acquire(
        manager: Arc<SessionManager>,
        caller_fingerprint: &str,
    ) -> Result<Self, SessionError> {
        let session = manager.create_session(caller_fingerprint).await?;
        Ok(Self {
            manager,
            session,
            released: false,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mark_completing(&self) {
        self.manager.mark_completing(&self.session);
    }

    /// Releases the workspace in place.
    pub async fn release(mut self) -> Result<(), SessionError> {
        let result = self.manager.release_session(&self.session).await;
        self.released = true;
        result
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Cancelled before release; the sweeper may reclaim it from here on
        self.manager.mark_completing(&self.session);
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = Arc::clone(&self.manager);
                runtime.spawn(async move {
                    match manager.release_session(&session).await {
                        Ok(()) => {
                            debug!(session_id = %session.id(), "Abandoned session released")
                        }
                        Err(e) => warn!(
                            session_id = %session.id(),
                            error = %e,
                            "Deferred session release failed"
                        ),
                    }
                });
            }
            Err(_) => warn!(
                session_id = %session.id(),
                "No runtime to release abandoned session, leaving it to the sweeper"
            ),
        }
    }
}

/// Periodically runs [`SessionManager::sweep_stale_sessions`] in the background.
pub struct SessionSweeper {
    scheduler: JobScheduler,
}

impl SessionSweeper {
    pub async fn start(
        manager: Arc<SessionManager>,
        interval: Duration,
        max_age: Duration,
    ) -> Result<Self, SessionError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SessionError::Scheduler(e.to_string()))?;

        let job = Job::new_repeated_async(interval, move |_id, _scheduler| {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                if let Err(e) = manager.sweep_stale_sessions(max_age).await {
                    warn!(error = %e, "Session sweep failed");
                }
            })
        })
        .map_err(|e| SessionError::Scheduler(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| SessionError::Scheduler(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SessionError::Scheduler(e.to_string()))?;

        info!(interval_secs = interval.as_secs(), "Session sweeper started");
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| SessionError::Scheduler(e.to_string()))
    }
}

fn session_id(created_at: DateTime<Utc>, caller_fingerprint: &str) -> String {
    let token = nanoid::nanoid!(12, &TOKEN_ALPHABET);
    let digest = Sha256::digest(caller_fingerprint.as_bytes());
    let caller = hex::encode(&digest[..4]);
    format!("{}-{}-{}", created_at.timestamp_millis(), token, caller)
}

/// Creation time of an untracked session directory: from its id, else its mtime.
async fn created_at_of(id: &str, path: &Path) -> DateTime<Utc> {
    if let Some(ts) = id
        .split('-')
        .next()
        .and_then(|p| p.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    {
        return ts;
    }

    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

async fn remove_tree(path: &Path) -> Result<(), SessionError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SessionError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
