//! Test event API client

use sums_models::{TestEventRequest, TestEventResponse, TestEventUpdate};

use crate::errors::ApiError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Open a test event record for this run
    pub async fn create_test_event(&self, request: &TestEventRequest) -> Result<TestEventResponse, ApiError> {
        self.post("/api/v1/test_events", request).await
    }

    /// Record the final result of a test event
    pub async fn update_test_event(
        &self,
        test_event_id: &str,
        update: &TestEventUpdate,
    ) -> Result<(), ApiError> {
        let path = format!("/api/v1/test_events/{}", test_event_id);
        let _: serde_json::Value = self.patch(&path, update).await?;
        Ok(())
    }
}
