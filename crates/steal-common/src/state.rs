//! Lifecycle state machine for the sampling loop.
//!
//! STOPPED → RUNNING → STOP_REQUESTED → STOPPED
//!
//! The caller drives STOPPED → RUNNING (start) and RUNNING →
//! STOP_REQUESTED (stop request); only the sampling thread drives
//! STOP_REQUESTED → STOPPED when it observes the request and exits.

use crate::error::{StealError, StealResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the background sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    /// No sampling thread exists; per-CPU baselines may be absent.
    #[default]
    Stopped,
    /// The sampling thread is live and accounting every period.
    Running,
    /// Stop has been requested; the thread exits after the cycle in
    /// progress (if any) completes.
    StopRequested,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
            Self::StopRequested => write!(f, "STOP_REQUESTED"),
        }
    }
}

impl LoopState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: LoopState) -> bool {
        use LoopState::{Running, StopRequested, Stopped};

        matches!(
            (self, target),
            (Stopped, Running) | (Running, StopRequested) | (StopRequested, Stopped)
        )
    }

    /// Attempt to transition to `target`, returning an error if invalid.
    pub fn transition_to(&mut self, target: LoopState) -> StealResult<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(StealError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Returns true while a sampling thread exists (running or draining).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::StopRequested)
    }
}
