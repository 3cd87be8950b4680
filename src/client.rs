//! HTTP client module for the Pulsewire REST API.
//!
//! This module performs the three request/response exchanges the SDK and the
//! CLI need: credential validation, status queries and reset notification.
//! Each call is a single round trip. There are no retries and no backoff;
//! the caller decides what to do with a failure.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, SDK_VERSION};

/// Longest prefix of a non-JSON error body quoted in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// API key and instance identifier used to authenticate with the service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub instance_id: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Entitlement fields returned by a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    #[serde(default)]
    pub company_name: Option<String>,

    #[serde(default)]
    pub plan_status: Option<String>,

    #[serde(default)]
    pub plan_expiry: Option<String>,
}

/// Status of an instance as reported by `GET /status/{instanceId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub message: Option<String>,
    pub plan_status: Option<String>,
    pub plan_expiry: Option<String>,
}

/// Errors returned by [`ValidationClient`].
///
/// Each variant carries a human-readable message: the server's own `message`
/// when it sent one, otherwise a description of what went wrong in transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("status check failed: {0}")]
    Status(String),

    #[error("reset notification failed: {0}")]
    Reset(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// The message without the operation prefix.
    pub fn message(&self) -> &str {
        match self {
            ClientError::Validation(m)
            | ClientError::Status(m)
            | ClientError::Reset(m)
            | ClientError::Config(m) => m,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    api_key: &'a str,
    instance_id: &'a str,
    sdk_version: &'a str,
    timestamp: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody {
    #[serde(default)]
    valid: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    entitlement: ValidationResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    plan_status: Option<String>,
    #[serde(default)]
    plan_expiry: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest<'a> {
    instance_id: &'a str,
    timestamp: String,
}

/// Client for the Pulsewire REST API.
///
/// The underlying `reqwest::Client` is reused across calls for connection
/// pooling; every request is bounded by the configured timeout.
///
/// # Example
///
/// ```no_run
/// use pulsewire::client::{Credentials, ValidationClient};
/// use pulsewire::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let client = ValidationClient::new(&Config::default()).expect("Failed to create client");
///     let credentials = Credentials::new("pk_live_123", "billing-api");
///
///     match client.validate(&credentials).await {
///         Ok(response) => println!("Plan: {:?}", response.plan_status),
///         Err(e) => eprintln!("{}", e),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ValidationClient {
    client: Client,
    api_url: String,
    timeout: Duration,
}

impl ValidationClient {
    /// Create a client for the API host named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(&config.api_url, config.request_timeout)
    }

    /// Create a client for an explicit host and timeout.
    pub fn with_settings(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&format!("pulsewire-sdk/{}", SDK_VERSION))
            .map_err(|e| ClientError::Config(e.to_string()))?;
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Validate credentials and fetch the plan entitlement.
    ///
    /// Succeeds only when the server answers HTTP 200 with `valid: true`;
    /// the entitlement fields are returned exactly as the server sent them.
    pub async fn validate(
        &self,
        credentials: &Credentials,
    ) -> Result<ValidationResponse, ClientError> {
        let url = format!("{}/auth/validate/key", self.api_url);
        let request = ValidateRequest {
            api_key: &credentials.api_key,
            instance_id: &credentials.instance_id,
            sdk_version: SDK_VERSION,
            timestamp: http_date(),
        };

        debug!(url = %url, instance_id = %credentials.instance_id, "Validating credentials");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Validation(describe_transport_error(&e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = error_message(response).await;
            warn!(status = status.as_u16(), message = %message, "Credential validation rejected");
            return Err(ClientError::Validation(message));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Validation(describe_transport_error(&e)))?;
        let parsed: ValidateBody = serde_json::from_str(&body)
            .map_err(|e| ClientError::Validation(format!("malformed response body: {}", e)))?;

        if parsed.valid != Some(true) {
            let message = parsed
                .message
                .unwrap_or_else(|| "credentials were not accepted".to_string());
            warn!(message = %message, "Credential validation rejected");
            return Err(ClientError::Validation(message));
        }

        info!(
            instance_id = %credentials.instance_id,
            plan_status = ?parsed.entitlement.plan_status,
            "Credentials validated"
        );
        Ok(parsed.entitlement)
    }

    /// Query the service-side status of an instance.
    pub async fn check_status(
        &self,
        instance_id: &str,
        api_key: &str,
    ) -> Result<StatusResponse, ClientError> {
        let url = self.status_url(instance_id)?;
        debug!(url = %url, "Checking instance status");

        let response = self
            .client
            .get(url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| ClientError::Status(describe_transport_error(&e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::Status(error_message(response).await));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Status(describe_transport_error(&e)))?;
        let parsed: StatusBody = serde_json::from_str(&body)
            .map_err(|e| ClientError::Status(format!("malformed response body: {}", e)))?;

        let Some(instance_status) = parsed.status else {
            return Err(ClientError::Status(
                "response did not include a status".to_string(),
            ));
        };

        Ok(StatusResponse {
            status: instance_status,
            message: parsed.message,
            plan_status: parsed.plan_status,
            plan_expiry: parsed.plan_expiry,
        })
    }

    /// Tell the service that the local configuration of an instance was removed.
    pub async fn notify_reset(&self, instance_id: &str, api_key: &str) -> Result<(), ClientError> {
        let url = format!("{}/reset/notify", self.api_url);
        let request = ResetRequest {
            instance_id,
            timestamp: http_date(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Reset(describe_transport_error(&e)))?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => {
                info!(instance_id = %instance_id, "Reset notification delivered");
                Ok(())
            }
            _ => Err(ClientError::Reset(error_message(response).await)),
        }
    }

    /// Get the configured API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn status_url(&self, instance_id: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| ClientError::Config(format!("invalid API URL '{}': {}", self.api_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("API URL '{}' cannot be a base", self.api_url)))?
            .pop_if_empty()
            .extend(["status", instance_id]);
        Ok(url)
    }
}

/// Current time as an HTTP date, e.g. `Sun, 18 Oct 2026 12:00:00 GMT`.
fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("could not connect to server: {}", err)
    } else {
        format!("request failed: {}", err)
    }
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// Drain an error response into a message.
async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => extract_error_message(status, &body),
        Err(_) => status_line(status),
    }
}

/// Pick the best message out of an error response body.
///
/// A JSON `message` field wins; a non-JSON body is quoted up to a bounded
/// prefix; anything else falls back to the status line.
fn extract_error_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status_line(status);
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status_line(status)),
        Err(_) => {
            let prefix: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            format!("non-JSON error body: {}", prefix)
        }
    }
}
