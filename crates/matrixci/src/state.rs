//! Per-combination lifecycle state machine.
//!
//! ```text
//! PENDING -> PROVISIONING -> RUNNING -> {SUCCEEDED, FAILED, TIMED_OUT}
//!                         \-> ERROR
//! ```
//!
//! Terminal states are final.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MatrixError, Result};
use crate::obs;

/// Lifecycle state of one combination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombinationState {
    Pending,
    Provisioning,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Error,
}

impl CombinationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombinationState::Pending => "PENDING",
            CombinationState::Provisioning => "PROVISIONING",
            CombinationState::Running => "RUNNING",
            CombinationState::Succeeded => "SUCCEEDED",
            CombinationState::Failed => "FAILED",
            CombinationState::TimedOut => "TIMED_OUT",
            CombinationState::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CombinationState::Succeeded
                | CombinationState::Failed
                | CombinationState::TimedOut
                | CombinationState::Error
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: CombinationState) -> bool {
        use CombinationState::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Running)
                | (Provisioning, Error)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }
}

impl fmt::Display for CombinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status recorded in a run result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Succeeded,
    Failed,
    TimedOut,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        CombinationState::from(*self).as_str()
    }

    /// Whether this status counts as a failure of the build.
    pub fn is_failure(&self) -> bool {
        !matches!(self, RunStatus::Succeeded)
    }
}

impl From<RunStatus> for CombinationState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Succeeded => CombinationState::Succeeded,
            RunStatus::Failed => CombinationState::Failed,
            RunStatus::TimedOut => CombinationState::TimedOut,
            RunStatus::Error => CombinationState::Error,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one combination through its lifecycle, logging every transition.
#[derive(Debug)]
pub struct Lifecycle {
    label: String,
    state: CombinationState,
    history: Vec<CombinationState>,
}

impl Lifecycle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: CombinationState::Pending,
            history: vec![CombinationState::Pending],
        }
    }

    pub fn state(&self) -> CombinationState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[CombinationState] {
        &self.history
    }

    pub fn advance(&mut self, next: CombinationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MatrixError::InvalidStateTransition {
                current: self.state.to_string(),
                requested: next.to_string(),
            });
        }
        obs::emit_state_changed(&self.label, self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}
