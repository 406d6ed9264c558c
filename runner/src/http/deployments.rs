//! Deployment API client

use sums_models::{DeployRequest, DeploymentResponse, StatusResponse};

use crate::errors::ApiError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Schedule the deployment of a fixed event
    pub async fn create_deployment(&self, request: &DeployRequest) -> Result<DeploymentResponse, ApiError> {
        self.post("/api/v1/deployments", request).await
    }

    /// Get the current status of a deployment
    pub async fn get_deployment_status(&self, deployment_id: &str) -> Result<StatusResponse, ApiError> {
        let path = format!("/api/v1/deployments/{}", deployment_id);
        self.get(&path).await
    }
}
