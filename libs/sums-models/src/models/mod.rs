//! Wire models for the SUMS update-management API

use serde::{Deserialize, Serialize};

/// One ECU entry of an event declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuRecord {
    pub ecu_name: String,
    pub part_number: String,
    pub sw_version: String,
}

/// Event creation request
///
/// Source and target events share one shape; which is which is only known
/// to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub tester_name: String,
    pub program_name: String,
    pub model_year: String,
    pub vin: String,
    pub update_type: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_spec: Option<String>,
    pub build_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub ecus: Vec<EcuRecord>,
}

/// Event creation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    #[serde(alias = "id")]
    pub event_id: String,
}

/// Event fix (lock) response
///
/// Any 2xx reply means the event is fixed; these fields only carry an
/// explicit confirmation when the backend sends one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixEventResponse {
    #[serde(default)]
    pub fixed: Option<bool>,

    #[serde(default)]
    pub locked: Option<bool>,

    #[serde(default)]
    pub status: Option<String>,
}

impl FixEventResponse {
    /// Whether the reply says so explicitly
    pub fn confirms_fix(&self) -> bool {
        self.fixed == Some(true)
            || self.locked == Some(true)
            || self
                .status
                .as_deref()
                .is_some_and(|s| s.to_ascii_lowercase().contains("fixed"))
    }
}

/// Deployment request for a fixed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub event_id: String,
    pub deployment_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<String>,
}

/// Deployment creation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    #[serde(alias = "id")]
    pub deployment_id: String,

    #[serde(default)]
    pub state: Option<String>,
}

/// Status of a deployment or event
///
/// The backend reports the state under either `state` or `status`, and the
/// failure reason under either `reason` or `error_message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub state: Option<serde_json::Value>,

    #[serde(default)]
    pub status: Option<serde_json::Value>,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub timestamps: serde_json::Map<String, serde_json::Value>,
}

impl StatusResponse {
    /// Reported state, `UNKNOWN` when absent
    pub fn state(&self) -> String {
        [&self.state, &self.status]
            .into_iter()
            .flatten()
            .find_map(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    /// Reported failure reason, if any
    pub fn reason(&self) -> Option<String> {
        self.reason
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| self.error_message.clone().filter(|r| !r.is_empty()))
    }
}

/// Test event creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEventRequest {
    pub vin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    pub event_id: String,
    pub ansible_job_id: String,
    pub git_sha: String,
    pub suite_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Test event creation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEventResponse {
    #[serde(alias = "id")]
    pub test_event_id: String,
}

/// Final test event update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEventUpdate {
    pub status: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Error response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Human readable message, preferring `error` over `message`
    pub fn summary(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}
