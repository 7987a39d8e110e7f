//! HTTP utilities for Azure REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let char_count = body.chars().count();
    let truncated = if char_count > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-2xx answer from an Azure endpoint
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    /// Error message reported by the service, if the body carried one
    pub message: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API request failed: {}", self.status)?;
        if let Some(message) = &self.message {
            write!(f, " - {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn from_body(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            message: extract_error_message(body).map(|m| sanitize_for_log(&m)),
        }
    }
}

/// Pull the human readable message out of an ARM (`error.message`) or
/// AAD (`error_description`) error body
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| value.get("error_description"))
        .and_then(|v| v.as_str())
        .map(|s| s.lines().next().unwrap_or(s).to_string())
}

/// HTTP client wrapper for Azure API calls
#[derive(Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("azmon/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make an authenticated GET request
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        self.get_with_query(url, token, &[]).await
    }

    /// Make an authenticated GET request with query parameters
    pub async fn get_with_query(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;

        Self::read_json(response).await
    }

    /// POST a url-encoded form, unauthenticated (token endpoints)
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value> {
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .context("Failed to send request")?;

        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_body(status, &body).into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}
