//! Deployment models

use chrono::{DateTime, Utc};
use serde::Serialize;
use sums_models::StatusResponse;
use tracing::debug;

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::status::StatusClass;
use crate::workers::poller::Observed;

/// One status read of a backend deployment or event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub reason: Option<String>,
    pub timestamps: serde_json::Map<String, serde_json::Value>,
}

impl From<StatusResponse> for StatusSnapshot {
    fn from(resp: StatusResponse) -> Self {
        Self {
            state: resp.state(),
            reason: resp.reason(),
            timestamps: resp.timestamps,
        }
    }
}

impl Observed for StatusSnapshot {
    fn state(&self) -> &str {
        &self.state
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Deployment timestamps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentTimestamps {
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub terminal_at: Option<DateTime<Utc>>,
}

/// One in-flight attempt to push a target event to a vehicle
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub deployment_id: String,
    pub target_event_id: String,
    #[serde(skip)]
    fsm: DeploymentFsm,
    state: DeploymentState,
    last_reported_state: Option<String>,
    terminal_reason: Option<String>,
    pub timestamps: DeploymentTimestamps,

    /// Timestamps as reported by the backend on the latest read
    pub backend_timestamps: serde_json::Map<String, serde_json::Value>,
}

impl Deployment {
    pub(crate) fn new(deployment_id: String, target_event_id: String) -> Self {
        Self {
            deployment_id,
            target_event_id,
            fsm: DeploymentFsm::new(),
            state: DeploymentState::Pending,
            last_reported_state: None,
            terminal_reason: None,
            timestamps: DeploymentTimestamps {
                created_at: Utc::now(),
                last_polled_at: None,
                terminal_at: None,
            },
            backend_timestamps: serde_json::Map::new(),
        }
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn terminal_reason(&self) -> Option<&str> {
        self.terminal_reason.as_deref()
    }

    pub fn last_reported_state(&self) -> Option<&str> {
        self.last_reported_state.as_deref()
    }

    /// Fold a status read into the deployment
    ///
    /// Observations that would move the state backwards, or change it after
    /// it became terminal, are ignored.
    pub fn observe(&mut self, snapshot: &StatusSnapshot, class: StatusClass) {
        let now = Utc::now();
        self.timestamps.last_polled_at = Some(now);
        self.last_reported_state = Some(snapshot.state.clone());
        self.backend_timestamps = snapshot.timestamps.clone();

        let event = match class {
            StatusClass::Success => DeploymentEvent::Complete,
            StatusClass::Failure => DeploymentEvent::Fail(
                snapshot
                    .reason
                    .clone()
                    .unwrap_or_else(|| snapshot.state.clone()),
            ),
            StatusClass::InProgress if snapshot.state.trim().eq_ignore_ascii_case("PENDING") => {
                DeploymentEvent::Scheduled
            }
            StatusClass::InProgress => DeploymentEvent::Progress,
        };

        if let Err(e) = self.fsm.process(event) {
            debug!("Ignoring deployment {} observation: {}", self.deployment_id, e);
            return;
        }

        self.state = self.fsm.state();
        if self.state.is_terminal() {
            self.timestamps.terminal_at = Some(now);
            self.terminal_reason = self.fsm.error().map(str::to_string);
        }
    }

    /// Completion time: the backend's own timestamp when reported, else the
    /// time the terminal state was first observed
    pub fn completed_at(&self) -> Option<String> {
        if self.state != DeploymentState::Complete {
            return None;
        }
        ["completed_at", "completed", "finished_at", "end"]
            .iter()
            .find_map(|k| self.backend_timestamps.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)
            .or_else(|| self.timestamps.terminal_at.map(|t| t.to_rfc3339()))
    }
}
