//! Session management module.
//!
//! A relay instance runs at most one PTY session. This module holds its
//! identity and lifecycle state, the on-disk record used for crash recovery,
//! and the [`SessionManager`] that owns the live process.

mod id;
mod manager;
mod record;
mod state;

pub use id::SessionId;
pub use manager::{CreateOptions, LaunchMode, SessionDetection, SessionInfo, SessionManager};
pub use record::{RecordFile, RecoveryOutcome, SessionRecord};
pub use state::SessionState;
