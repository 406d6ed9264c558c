//! Error types for the OTA test runner

use std::time::Duration;

use thiserror::Error;

/// Backend API client errors
///
/// Every call produces either a parsed 2xx response or exactly one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        payload: Option<serde_json::Value>,
    },
}

impl ApiError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Api { status, .. } => *status == 429 || *status >= 500,
            ApiError::Auth { .. } | ApiError::NotFound { .. } => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Transport(_) => "transport_error",
            ApiError::Auth { .. } => "auth_error",
            ApiError::NotFound { .. } => "not_found_error",
            ApiError::Api { .. } => "api_error",
        }
    }
}

/// Event lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Event {event_id} is already locked")]
    AlreadyLocked { event_id: String },

    #[error("Event {event_id} is locked and cannot be modified")]
    Immutable { event_id: String },

    #[error("Event {event_id} cannot be deployed: {reason}")]
    NotDeployable { event_id: String, reason: String },

    #[error("Test run {test_event_id} was already reported")]
    AlreadyReported { test_event_id: String },
}

impl LifecycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Api(e) => e.kind(),
            LifecycleError::AlreadyLocked { .. } => "already_locked",
            LifecycleError::Immutable { .. } => "immutable_event",
            LifecycleError::NotDeployable { .. } => "not_deployable",
            LifecycleError::AlreadyReported { .. } => "already_reported",
        }
    }
}

/// Poll loop errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("Poll timeout after {}s, last observed state {}", elapsed.as_secs(), last_state.as_deref().unwrap_or("<none>"))]
    Timeout {
        last_state: Option<String>,
        elapsed: Duration,
    },

    #[error("Polling cancelled")]
    Cancelled,

    #[error("Status fetch failed: {0}")]
    Fetch(ApiError),
}

impl PollError {
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::Timeout { .. } => "poll_timeout",
            PollError::Cancelled => "cancelled",
            PollError::Fetch(e) => e.kind(),
        }
    }
}

/// Errors from the device-control command line tool
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceControlError {
    #[error("Failed to run `{cmd}`: {message}")]
    Spawn { cmd: String, message: String },

    #[error("`{cmd}` timed out after {}s", timeout.as_secs())]
    Timeout { cmd: String, timeout: Duration },

    #[error("`{cmd}` exited with {rc}: {message}")]
    Failed { cmd: String, rc: i32, message: String },

    #[error("Unexpected output from `{cmd}`: {message}")]
    Parse { cmd: String, message: String },
}

impl DeviceControlError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceControlError::Spawn { .. } => "device_control_unavailable",
            DeviceControlError::Timeout { .. } => "device_control_timeout",
            DeviceControlError::Failed { .. } => "device_control_failed",
            DeviceControlError::Parse { .. } => "device_control_output",
        }
    }
}

/// Device readiness wait failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadyError {
    #[error("Device not ready after {attempts} checks (last rc {last_rc}): {last_output}")]
    NotReady {
        attempts: u32,
        last_rc: i32,
        last_output: String,
    },

    #[error("Readiness wait cancelled")]
    Cancelled,

    #[error(transparent)]
    Control(#[from] DeviceControlError),
}

impl ReadyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReadyError::NotReady { .. } => "device_not_ready",
            ReadyError::Cancelled => "cancelled",
            ReadyError::Control(e) => e.kind(),
        }
    }
}

/// Lease could not be acquired
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Lease acquisition failed for selector {selector}: {source}")]
pub struct LeaseAcquisitionError {
    pub selector: String,
    #[source]
    pub source: DeviceControlError,
}

impl LeaseAcquisitionError {
    pub fn kind(&self) -> &'static str {
        "lease_acquisition_error"
    }
}

/// Lease release failed; never overrides the run result
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize)]
#[error("Lease {lease_name} was not released: {message}")]
pub struct LeaseReleaseWarning {
    pub lease_name: String,
    pub message: String,
}

/// Preflight check failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreflightError {
    #[error("Invalid run plan: {0}")]
    InvalidPlan(String),

    #[error("Device control tool unavailable: {0}")]
    ToolUnavailable(DeviceControlError),

    #[error("Exporter query failed: {0}")]
    ExporterQuery(DeviceControlError),

    #[error("Exporter {exporter} not found (available: {})", available.join(", "))]
    ExporterMissing {
        exporter: String,
        available: Vec<String>,
    },
}

impl PreflightError {
    pub fn kind(&self) -> &'static str {
        match self {
            PreflightError::InvalidPlan(_) => "invalid_plan",
            PreflightError::ToolUnavailable(_) => "tool_unavailable",
            PreflightError::ExporterQuery(_) => "exporter_query_failed",
            PreflightError::ExporterMissing { .. } => "exporter_missing",
        }
    }
}

/// Top level error type for the runner binary
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
