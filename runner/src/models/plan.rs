//! Run plan: what to create, deploy and report for one test run

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::errors::PreflightError;
use crate::models::event::Ecu;

/// Update type of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    Rrom,
    Urom,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Rrom => "RROM",
            UpdateType::Urom => "UROM",
        }
    }
}

/// Backend fields shared by both events of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    pub tester_name: String,
    pub program_name: String,
    pub model_year: String,
    pub update_type: UpdateType,
    pub region: String,
    #[serde(default)]
    pub region_spec: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Vehicle under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub vin: String,

    /// Backend vehicle id, when already known
    #[serde(default)]
    pub vehicle_id: Option<String>,
}

/// Software state declared by one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    pub build_level: String,
    pub ecus: Vec<Ecu>,
}

/// Deployment scheduling options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployWindow {
    /// Window start (RFC 3339)
    #[serde(default)]
    pub start_datetime: Option<String>,

    /// Window end (RFC 3339)
    #[serde(default)]
    pub end_datetime: Option<String>,

    #[serde(default = "default_deployment_count")]
    pub deployment_count: u32,
}

fn default_deployment_count() -> u32 {
    1
}

impl Default for DeployWindow {
    fn default() -> Self {
        Self {
            start_datetime: None,
            end_datetime: None,
            deployment_count: default_deployment_count(),
        }
    }
}

/// Test record metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub suite_name: String,
    pub git_sha: String,

    /// CI job id; a random id is generated when absent
    #[serde(default)]
    pub job_id: Option<String>,

    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Everything one run needs to know about the update under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub vehicle: VehicleSpec,
    pub context: EventContext,
    pub source: EventSpec,
    pub target: EventSpec,
    #[serde(default)]
    pub deploy: DeployWindow,
    pub test: TestSpec,
    #[serde(default)]
    pub artifact_urls: Vec<String>,
}

fn require(field: &str, value: &str) -> Result<(), PreflightError> {
    if value.trim().is_empty() {
        return Err(PreflightError::InvalidPlan(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_event(name: &str, spec: &EventSpec) -> Result<(), PreflightError> {
    require(&format!("{name}.build_level"), &spec.build_level)?;
    if spec.ecus.is_empty() {
        return Err(PreflightError::InvalidPlan(format!("{name}.ecus must not be empty")));
    }
    for (i, ecu) in spec.ecus.iter().enumerate() {
        require(&format!("{name}.ecus[{i}].name"), &ecu.name)?;
        require(&format!("{name}.ecus[{i}].part_number"), &ecu.part_number)?;
        require(&format!("{name}.ecus[{i}].version"), &ecu.version)?;
    }
    Ok(())
}

impl RunPlan {
    /// Check the plan before any device or backend side effect
    pub fn validate(&self) -> Result<(), PreflightError> {
        require("vehicle.vin", &self.vehicle.vin)?;
        require("context.tester_name", &self.context.tester_name)?;
        require("context.program_name", &self.context.program_name)?;
        require("context.model_year", &self.context.model_year)?;
        require("context.region", &self.context.region)?;
        validate_event("source", &self.source)?;
        validate_event("target", &self.target)?;
        require("test.suite_name", &self.test.suite_name)?;
        require("test.git_sha", &self.test.git_sha)?;

        if self.deploy.deployment_count == 0 {
            return Err(PreflightError::InvalidPlan(
                "deploy.deployment_count must be at least 1".into(),
            ));
        }

        let start = parse_datetime("deploy.start_datetime", self.deploy.start_datetime.as_deref())?;
        let end = parse_datetime("deploy.end_datetime", self.deploy.end_datetime.as_deref())?;
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(PreflightError::InvalidPlan(
                    "deploy.end_datetime must be after deploy.start_datetime".into(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_datetime(
    field: &str,
    value: Option<&str>,
) -> Result<Option<DateTime<chrono::FixedOffset>>, PreflightError> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map_err(|e| PreflightError::InvalidPlan(format!("{field}: {e}")))
        })
        .transpose()
}
