//! Finite State Machine for backend deployments
//!
//! `Pending -> Running -> {Complete | Failed}`. The state only moves forward
//! and a terminal state never changes.

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    /// Scheduled by the backend, not yet started
    Pending,

    /// Being applied to the vehicle
    Running,

    /// Applied successfully
    Complete,

    /// Failed, cancelled or rejected by the backend
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Complete | DeploymentState::Failed)
    }
}

/// An observation of the backend deployment status
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Backend still reports the deployment as scheduled
    Scheduled,

    /// Backend reports work in progress
    Progress,

    /// Backend reports success
    Complete,

    /// Backend reports failure
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Pending,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get the failure reason if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an observation and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (DeploymentState::Pending, DeploymentEvent::Scheduled) => DeploymentState::Pending,
            (DeploymentState::Pending | DeploymentState::Running, DeploymentEvent::Progress) => {
                DeploymentState::Running
            }
            (DeploymentState::Pending | DeploymentState::Running, DeploymentEvent::Complete) => {
                DeploymentState::Complete
            }
            (DeploymentState::Pending | DeploymentState::Running, DeploymentEvent::Fail(reason)) => {
                self.error = Some(reason.clone());
                DeploymentState::Failed
            }

            // Backwards moves and anything after a terminal state
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
