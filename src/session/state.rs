//! Session state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the PTY session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// PTY allocated, process launching.
    #[default]
    Starting,
    /// Process running and reader loop draining output.
    Running,
    /// Process gone; cannot be reused.
    Destroyed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Starting -> Running
    /// - Starting -> Destroyed
    /// - Running -> Destroyed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Starting, Running) | (Starting, Destroyed) | (Running, Destroyed)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::RelayError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Destroyed)
    }

    /// Whether input and resize are accepted.
    pub fn accepts_input(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}
