//! Test run record

use serde::{Deserialize, Serialize};

use crate::errors::LifecycleError;

/// Final verdict of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
        }
    }
}

/// The backend record tying a vehicle, an event pair and a result together
///
/// Opened early in the run and finalized exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRun {
    pub test_event_id: String,
    status: Option<TestStatus>,
    summary: Option<String>,
    artifact_urls: Vec<String>,
    metadata: Option<serde_json::Value>,
}

impl TestRun {
    pub(crate) fn new(test_event_id: String) -> Self {
        Self {
            test_event_id,
            status: None,
            summary: None,
            artifact_urls: Vec::new(),
            metadata: None,
        }
    }

    pub fn status(&self) -> Option<TestStatus> {
        self.status
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn artifact_urls(&self) -> &[String] {
        &self.artifact_urls
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn is_reported(&self) -> bool {
        self.status.is_some()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), LifecycleError> {
        if self.is_reported() {
            return Err(LifecycleError::AlreadyReported {
                test_event_id: self.test_event_id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn finalize(
        &mut self,
        status: TestStatus,
        summary: String,
        artifact_urls: Vec<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), LifecycleError> {
        self.ensure_open()?;
        self.status = Some(status);
        self.summary = Some(summary);
        self.artifact_urls = artifact_urls;
        self.metadata = metadata;
        Ok(())
    }
}
