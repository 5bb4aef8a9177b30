//! ServiceManager lifecycle states and the transition guard.
//!
//! ```text
//!            start            pause
//!   INIT ───────────► START ───────► PAUSE
//!    ▲   FAILED ─────►  │  ◄─────────  │
//!    │                  ▼   succeed    │ succeed
//!  reset            SUCCESS ◄──────────┘
//! ```
//!
//! `FAILED` is reachable from every state; `INIT` is reachable from every
//! state through `reset`.  `SUCCESS` is only reachable from `START` or
//! `PAUSE`, so a service can never report success for work it never began.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    #[default]
    Init,
    Start,
    Pause,
    Success,
    Failed,
}

impl ServiceState {
    pub const fn label(self) -> &'static str {
        match self {
            ServiceState::Init => "INIT",
            ServiceState::Start => "START",
            ServiceState::Pause => "PAUSE",
            ServiceState::Success => "SUCCESS",
            ServiceState::Failed => "FAILED",
        }
    }

    pub const fn can_transition_to(self, to: ServiceState) -> bool {
        match to {
            ServiceState::Init | ServiceState::Start | ServiceState::Failed => true,
            ServiceState::Pause => matches!(self, ServiceState::Start | ServiceState::Pause),
            ServiceState::Success => matches!(
                self,
                ServiceState::Start | ServiceState::Pause | ServiceState::Success
            ),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Owned lifecycle state of one ServiceManager.
///
/// Only the owning service drives it; every mutator validates the move with
/// [`ServiceState::can_transition_to`].
#[derive(Debug, Clone, Default)]
pub struct ServiceLifecycle {
    state: ServiceState,
}

impl ServiceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Move to `to`, or return [`ActionError::Lifecycle`] leaving the state
    /// untouched.
    pub fn transition(&mut self, to: ServiceState) -> Result<(), ActionError> {
        if !self.state.can_transition_to(to) {
            return Err(ActionError::Lifecycle {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) {
        self.state = ServiceState::Start;
    }

    pub fn pause(&mut self) -> Result<(), ActionError> {
        self.transition(ServiceState::Pause)
    }

    pub fn succeed(&mut self) -> Result<(), ActionError> {
        self.transition(ServiceState::Success)
    }

    pub fn fail(&mut self) {
        self.state = ServiceState::Failed;
    }

    pub fn reset(&mut self) {
        self.state = ServiceState::Init;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_start() {
        let mut lifecycle = ServiceLifecycle::new();
        let err = lifecycle.succeed().unwrap_err();
        assert_eq!(
            err,
            ActionError::Lifecycle {
                from: ServiceState::Init,
                to: ServiceState::Success
            }
        );
        assert_eq!(lifecycle.state(), ServiceState::Init);

        lifecycle.start();
        lifecycle.succeed().unwrap();
        assert_eq!(lifecycle.state(), ServiceState::Success);
    }

    #[test]
    fn failed_cannot_jump_to_success() {
        let mut lifecycle = ServiceLifecycle::new();
        lifecycle.start();
        lifecycle.fail();
        assert!(lifecycle.succeed().is_err());
        assert_eq!(lifecycle.state(), ServiceState::Failed);
    }

    #[test]
    fn pause_only_from_running_states() {
        let mut lifecycle = ServiceLifecycle::new();
        assert!(lifecycle.pause().is_err());
        lifecycle.start();
        lifecycle.pause().unwrap();
        lifecycle.pause().unwrap();
        lifecycle.succeed().unwrap();
    }

    #[test]
    fn reset_returns_to_init() {
        let mut lifecycle = ServiceLifecycle::new();
        lifecycle.start();
        lifecycle.reset();
        assert_eq!(lifecycle.state(), ServiceState::Init);
    }
}
