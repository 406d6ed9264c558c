//! Event lifecycle: create, lock (fix), deploy, and report
//!
//! Nothing here retries. Creating, fixing and deploying are not idempotent on
//! the backend, so any failure is handed back to the caller as-is.

use std::sync::Arc;

use sums_models::{CreateEventRequest, DeployRequest, TestEventRequest, TestEventUpdate};
use tracing::{info, warn};

use crate::errors::{ApiError, LifecycleError};
use crate::http::client::HttpClient;
use crate::models::deployment::{Deployment, StatusSnapshot};
use crate::models::event::{Ecu, Event, EventKind};
use crate::models::plan::{DeployWindow, EventContext};
use crate::models::test_run::{TestRun, TestStatus};

/// Drives the backend side of one update test
pub struct EventLifecycle {
    http_client: Arc<HttpClient>,
    context: EventContext,
}

impl EventLifecycle {
    pub fn new(http_client: Arc<HttpClient>, context: EventContext) -> Self {
        Self {
            http_client,
            context,
        }
    }

    /// Register a new, unlocked event
    pub async fn create_event(
        &self,
        kind: EventKind,
        vehicle_id: &str,
        build_level: &str,
        ecu_list: &[Ecu],
    ) -> Result<Event, LifecycleError> {
        let request = CreateEventRequest {
            tester_name: self.context.tester_name.clone(),
            program_name: self.context.program_name.clone(),
            model_year: self.context.model_year.clone(),
            vin: vehicle_id.to_string(),
            update_type: self.context.update_type.as_str().to_string(),
            region: self.context.region.clone(),
            region_spec: self.context.region_spec.clone(),
            build_level: build_level.to_string(),
            remark: self.context.remark.clone(),
            ecus: ecu_list.iter().map(Into::into).collect(),
        };

        let response = self.http_client.create_event(&request).await?;
        info!("Created {} event {} ({})", kind, response.event_id, build_level);

        Ok(Event::new(
            response.event_id,
            kind,
            vehicle_id.to_string(),
            build_level.to_string(),
            ecu_list.to_vec(),
        ))
    }

    /// Lock an event, returning its locked copy
    ///
    /// Locking is irreversible; locking an already locked event is an error.
    /// The backend rejects a lock it cannot apply, so any 2xx reply locks.
    pub async fn lock_event(&self, event: &Event) -> Result<Event, LifecycleError> {
        if event.locked() {
            return Err(LifecycleError::AlreadyLocked {
                event_id: event.event_id().to_string(),
            });
        }

        let response = self.http_client.fix_event(event.event_id()).await?;
        if !response.confirms_fix() {
            warn!("Fix of {} accepted without explicit confirmation", event.event_id());
        }

        info!("Locked {} event {}", event.kind(), event.event_id());
        Ok(event.to_locked())
    }

    /// Schedule the deployment of a locked target event
    ///
    /// Returns as soon as the backend accepted the request; completion has
    /// to be observed by polling [`EventLifecycle::deployment_status`].
    pub async fn deploy(&self, target: &Event, window: &DeployWindow) -> Result<Deployment, LifecycleError> {
        if target.kind() != EventKind::Target {
            return Err(LifecycleError::NotDeployable {
                event_id: target.event_id().to_string(),
                reason: format!("{} events are not deployable", target.kind()),
            });
        }
        if !target.locked() {
            return Err(LifecycleError::NotDeployable {
                event_id: target.event_id().to_string(),
                reason: "event is not locked".to_string(),
            });
        }

        let request = DeployRequest {
            event_id: target.event_id().to_string(),
            deployment_count: window.deployment_count,
            start_datetime: window.start_datetime.clone(),
            end_datetime: window.end_datetime.clone(),
        };

        let response = self.http_client.create_deployment(&request).await?;
        info!(
            "Deployment {} scheduled for event {} (initial state {})",
            response.deployment_id,
            target.event_id(),
            response.state.as_deref().unwrap_or("PENDING")
        );

        Ok(Deployment::new(
            response.deployment_id,
            target.event_id().to_string(),
        ))
    }

    /// Read the current status of a deployment
    pub async fn deployment_status(&self, deployment_id: &str) -> Result<StatusSnapshot, ApiError> {
        let response = self.http_client.get_deployment_status(deployment_id).await?;
        Ok(response.into())
    }

    /// Read the current status of an event
    pub async fn event_status(&self, event_id: &str) -> Result<StatusSnapshot, ApiError> {
        let response = self.http_client.get_event_status(event_id).await?;
        Ok(response.into())
    }

    /// Open the test record for this run
    pub async fn open_test_run(&self, request: &TestEventRequest) -> Result<TestRun, LifecycleError> {
        let response = self.http_client.create_test_event(request).await?;
        info!("Opened test event {}", response.test_event_id);
        Ok(TestRun::new(response.test_event_id))
    }

    /// Record the final verdict; a test run can only be reported once
    pub async fn report(
        &self,
        test_run: &mut TestRun,
        status: TestStatus,
        summary: String,
        artifact_urls: Vec<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), LifecycleError> {
        test_run.ensure_open()?;

        let update = TestEventUpdate {
            status: status.as_str().to_string(),
            summary: summary.clone(),
            artifact_urls: artifact_urls.clone(),
            metadata: metadata.clone(),
        };
        self.http_client
            .update_test_event(&test_run.test_event_id, &update)
            .await?;

        info!("Reported test event {} as {}", test_run.test_event_id, status.as_str());
        test_run.finalize(status, summary, artifact_urls, metadata)
    }
}
