//! Run/pause/stop control shared between the execution loop and callers.
//!
//! The handle is cheap to clone; the runtime keeps a clone outside the agent
//! lock so an agent can be paused or stopped while its loop is running. The
//! loop itself observes transitions between tasks and records them in the
//! agent history.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an agent's execution loop.
///
/// At most one loop may be active per agent; `begin` enforces this by
/// rejecting a second start while the state is Running or Paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    /// No loop active; a run may be started.
    #[default]
    Idle,
    /// A loop is executing tasks.
    Running,
    /// A loop is active but holding between tasks.
    Paused,
    /// A stop was requested; the loop exits before starting another task.
    Stopped,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Idle => "idle",
            ControlState::Running => "running",
            ControlState::Paused => "paused",
            ControlState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from an illegal control transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("agent is already running")]
    AlreadyRunning,
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: ControlState,
    },
}

/// Shared, thread-safe control state for one agent.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    state: Arc<Mutex<ControlState>>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> ControlState {
        *self.lock()
    }

    /// Whether a loop is active (running or paused).
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ControlState::Running | ControlState::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ControlState::Paused
    }

    /// Mark a run as started.
    ///
    /// # Errors
    /// Returns [`ControlError::AlreadyRunning`] when a loop is already active.
    pub fn begin(&self) -> Result<(), ControlError> {
        let mut state = self.lock();
        match *state {
            ControlState::Idle | ControlState::Stopped => {
                *state = ControlState::Running;
                Ok(())
            }
            ControlState::Running | ControlState::Paused => Err(ControlError::AlreadyRunning),
        }
    }

    /// Request a pause; the loop holds after the current task.
    pub fn pause(&self) -> Result<(), ControlError> {
        let mut state = self.lock();
        match *state {
            ControlState::Running => {
                *state = ControlState::Paused;
                Ok(())
            }
            other => Err(ControlError::InvalidTransition {
                action: "pause",
                state: other,
            }),
        }
    }

    /// Resume a paused loop.
    pub fn resume(&self) -> Result<(), ControlError> {
        let mut state = self.lock();
        match *state {
            ControlState::Paused => {
                *state = ControlState::Running;
                Ok(())
            }
            other => Err(ControlError::InvalidTransition {
                action: "resume",
                state: other,
            }),
        }
    }

    /// Request a stop; the loop exits before starting any further task.
    ///
    /// Idempotent: stopping an idle or already-stopped agent is a no-op.
    /// Returns whether the call actually caused a transition.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        match *state {
            ControlState::Running | ControlState::Paused => {
                *state = ControlState::Stopped;
                true
            }
            ControlState::Idle | ControlState::Stopped => false,
        }
    }

    /// Mark the loop as finished naturally.
    ///
    /// A stop that raced the final task wins: the state stays Stopped so the
    /// caller can tell the difference.
    pub fn finish(&self) {
        let mut state = self.lock();
        if *state != ControlState::Stopped {
            *state = ControlState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_only_from_idle_or_stopped() {
        let control = ControlHandle::new();
        assert_eq!(control.state(), ControlState::Idle);

        control.begin().unwrap();
        assert_eq!(control.state(), ControlState::Running);
        assert_eq!(control.begin(), Err(ControlError::AlreadyRunning));

        control.stop();
        control.begin().unwrap();
        assert_eq!(control.state(), ControlState::Running);
    }

    #[test]
    fn pause_resume_cycle() {
        let control = ControlHandle::new();
        assert!(control.pause().is_err());

        control.begin().unwrap();
        control.pause().unwrap();
        assert!(control.is_paused());
        assert!(control.is_running(), "paused still counts as running");
        assert_eq!(
            control.pause(),
            Err(ControlError::InvalidTransition {
                action: "pause",
                state: ControlState::Paused,
            })
        );

        control.resume().unwrap();
        assert_eq!(control.state(), ControlState::Running);
        assert!(control.resume().is_err());
    }

    #[test]
    fn stop_is_idempotent() {
        let control = ControlHandle::new();
        assert!(!control.stop(), "stopping an idle agent is a no-op");

        control.begin().unwrap();
        assert!(control.stop());
        assert!(!control.stop());
        assert_eq!(control.state(), ControlState::Stopped);
    }

    #[test]
    fn stop_works_while_paused() {
        let control = ControlHandle::new();
        control.begin().unwrap();
        control.pause().unwrap();
        assert!(control.stop());
        assert_eq!(control.state(), ControlState::Stopped);
    }

    #[test]
    fn finish_returns_to_idle_unless_stopped() {
        let control = ControlHandle::new();
        control.begin().unwrap();
        control.finish();
        assert_eq!(control.state(), ControlState::Idle);

        control.begin().unwrap();
        control.stop();
        control.finish();
        assert_eq!(control.state(), ControlState::Stopped);

        control.begin().unwrap();
        control.pause().unwrap();
        control.finish();
        assert_eq!(control.state(), ControlState::Idle);
    }

    #[test]
    fn clones_share_state() {
        let control = ControlHandle::new();
        let remote = control.clone();
        control.begin().unwrap();
        assert!(remote.stop());
        assert_eq!(control.state(), ControlState::Stopped);
    }
}
