//! Event API client

use sums_models::{CreateEventRequest, EventResponse, FixEventResponse, StatusResponse};

use crate::errors::ApiError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Register a new event
    pub async fn create_event(&self, request: &CreateEventRequest) -> Result<EventResponse, ApiError> {
        self.post("/api/v1/events", request).await
    }

    /// Fix (lock) an event so it becomes eligible for deployment
    pub async fn fix_event(&self, event_id: &str) -> Result<FixEventResponse, ApiError> {
        let path = format!("/api/v1/events/{}/fix", event_id);
        self.post(&path, &serde_json::json!({})).await
    }

    /// Get the current status of an event
    pub async fn get_event_status(&self, event_id: &str) -> Result<StatusResponse, ApiError> {
        let path = format!("/api/v1/events/{}", event_id);
        self.get(&path).await
    }
}
