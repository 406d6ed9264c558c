//! HTTP client implementation

use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sums_models::ErrorResponse;
use tracing::{debug, warn};
use url::Url;

use crate::errors::ApiError;

const REDACTED: &str = "***";

/// Backend client configuration
#[derive(Debug)]
pub struct ClientOptions {
    /// Base URL of the backend, e.g. `https://sums.example.com`
    pub base_url: String,

    /// Bearer token, never logged
    pub token: SecretString,

    /// Verify the server TLS certificate
    pub verify_tls: bool,

    /// Timeout applied to every single request
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            verify_tls: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A successful (2xx) backend response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// HTTP client for backend communication
///
/// Holds no session state: every call carries its own credentials and its
/// own timeout.
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: SecretString,
    auth_header: HeaderValue,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(options: ClientOptions) -> Result<Self, ApiError> {
        let base_url = options.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ApiError::Transport(format!("invalid base url {base_url}: {e}")))?;

        let mut auth_header =
            HeaderValue::from_str(&format!("Bearer {}", options.token.expose_secret()))
                .map_err(|_| {
                    ApiError::Transport("token contains characters not allowed in a header".into())
                })?;
        auth_header.set_sensitive(true);

        if !options.verify_tls {
            warn!("TLS certificate verification is disabled for {}", base_url);
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: options.token,
            auth_header,
            timeout: options.timeout,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Perform one authenticated request
    ///
    /// A body is only sent for POST, PUT and PATCH.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse, ApiError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(header::AUTHORIZATION, self.auth_header.clone())
            .header(header::ACCEPT, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }

        if let Some(body) = body {
            if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        let result = self.interpret(status, path, &text);
        if let Err(e) = &result {
            debug!("{} {} failed: {}", method, url, e);
        }
        result
    }

    /// Translate a status code and raw body into the response or one error
    pub(crate) fn interpret(&self, status: u16, path: &str, text: &str) -> Result<ApiResponse, ApiError> {
        match status {
            200..=299 => {
                if text.trim().is_empty() {
                    return Ok(ApiResponse {
                        status,
                        body: Value::Object(serde_json::Map::new()),
                    });
                }
                serde_json::from_str(text)
                    .map(|body| ApiResponse { status, body })
                    .map_err(|e| ApiError::Api {
                        status,
                        message: format!("invalid JSON response body: {e}"),
                        payload: None,
                    })
            }
            401 | 403 => Err(ApiError::Auth { status }),
            404 => Err(ApiError::NotFound {
                path: path.to_string(),
            }),
            _ => {
                let payload = serde_json::from_str::<Value>(text).ok();
                let message = payload
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<ErrorResponse>(v.clone()).ok())
                    .and_then(|e| e.summary().map(str::to_string))
                    .unwrap_or_else(|| {
                        let raw = text.trim();
                        if raw.is_empty() {
                            reqwest::StatusCode::from_u16(status)
                                .ok()
                                .and_then(|s| s.canonical_reason())
                                .unwrap_or("Unknown error")
                                .to_string()
                        } else {
                            raw.to_string()
                        }
                    });

                Err(ApiError::Api {
                    status,
                    message: self.redact(&message),
                    payload: payload.map(|p| self.redact_value(p)),
                })
            }
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        let mut cause = if err.is_timeout() {
            format!("request timed out after {}s", self.timeout.as_secs())
        } else {
            err.to_string()
        };

        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            cause.push_str(": ");
            cause.push_str(&inner.to_string());
            source = inner.source();
        }

        ApiError::Transport(self.redact(&cause))
    }

    /// Remove any occurrence of the token from text headed for an error
    fn redact(&self, text: &str) -> String {
        let token = self.token.expose_secret();
        if token.is_empty() {
            text.to_string()
        } else {
            text.replace(token, REDACTED)
        }
    }

    fn redact_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.redact_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (self.redact(&k), self.redact_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ApiError::Transport(format!("failed to encode request body: {e}")))?;

        let response = self.request(method, path, body.as_ref(), &[]).await?;
        serde_json::from_value(response.body).map_err(|e| ApiError::Api {
            status: response.status,
            message: format!("unexpected response body: {e}"),
            payload: None,
        })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, Value>(Method::GET, path, None).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send(Method::PATCH, path, Some(body)).await
    }
}
