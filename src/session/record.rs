//! Persisted record of the last known session.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{SessionId, SessionState};
use crate::process::{self, Signal};
use crate::state_file;
use crate::Result;

/// What survives a restart about the running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub pid: u32,
    pub working_dir: PathBuf,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Result of checking the persisted record at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing was persisted.
    NoRecord,
    /// The recorded process is gone or is not ours; the record was dropped.
    Stale(SessionId),
    /// The recorded process was still running detached from any relay; its
    /// process group was stopped and the record dropped.
    ReapedOrphan(SessionId),
}

/// The on-disk location of the session record.
#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<SessionRecord>> {
        state_file::read_json(&self.path)
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        state_file::write_json_atomic(&self.path, record)
    }

    pub fn clear(&self) -> Result<()> {
        state_file::remove(&self.path)
    }

    /// Resolve a record left by a previous run.
    ///
    /// A record can only be verified when its pid is alive and still looks
    /// like a PTY session leader. Even then the PTY master died with the
    /// previous process, so the session can never be driven again; its
    /// process group is stopped. The record is removed in every case.
    pub fn recover(&self) -> RecoveryOutcome {
        let record = match self.load() {
            Ok(Some(record)) => record,
            Ok(None) => return RecoveryOutcome::NoRecord,
            Err(e) => {
                warn!(path = %self.path.display(), "unreadable session record: {}", e);
                self.clear_logged();
                return RecoveryOutcome::NoRecord;
            }
        };

        let verified = record.state != SessionState::Destroyed
            && process::is_alive(record.pid)
            && process::is_pty_session_leader(record.pid);

        self.clear_logged();

        if verified {
            info!(session_id = %record.id, pid = record.pid, "stopping orphaned session process");
            process::signal_group(record.pid, Signal::Term);
            RecoveryOutcome::ReapedOrphan(record.id)
        } else {
            info!(session_id = %record.id, pid = record.pid, "discarding stale session record");
            RecoveryOutcome::Stale(record.id)
        }
    }

    fn clear_logged(&self) {
        if let Err(e) = self.clear() {
            warn!(path = %self.path.display(), "failed to remove session record: {}", e);
        }
    }
}
