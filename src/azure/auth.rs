//! Azure AD Authentication
//!
//! Exchanges service principal credentials for bearer tokens using the
//! client credentials grant against the AAD v1 token endpoint.

use super::http::AzureHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

/// Token expiry buffer - treat tokens as expired this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if the response carries no expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Bearer token scoped to one resource audience
#[derive(Clone)]
pub struct BearerToken {
    token: String,
    /// Audience the token was issued for
    pub resource: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl BearerToken {
    pub fn new(token: impl Into<String>, resource: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: token.into(),
            resource: resource.into(),
            expires_at: Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Check if this token is still usable
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

// Security: never print the token itself
impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("resource", &self.resource)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Token endpoint for a tenant under an authority
fn token_url(authority_url: &str, tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/token",
        authority_url.trim_end_matches('/'),
        tenant_id.trim()
    )
}

/// AAD returns `expires_in` as a string on the v1 endpoint and as a number on v2
fn parse_expires_in(response: &Value) -> Option<Duration> {
    let raw = response.get("expires_in")?;
    let secs = match raw {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Acquire a bearer token for `resource` with a client id / secret pair
pub async fn get_access_token(
    http: &AzureHttpClient,
    tenant_id: &str,
    client_id: &str,
    client_secret: &str,
    authority_url: &str,
    resource: &str,
) -> Result<BearerToken> {
    let url = token_url(authority_url, tenant_id);
    tracing::debug!("Requesting token for resource {} from {}", resource, url);

    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("resource", resource),
    ];

    let response = http
        .post_form(&url, &form)
        .await
        .with_context(|| format!("Failed to get access token for {}", resource))?;

    let token = response
        .get("access_token")
        .and_then(|v| v.as_str())
        .context("Token response has no access_token")?;

    let ttl = parse_expires_in(&response).unwrap_or(DEFAULT_TOKEN_TTL);

    tracing::debug!(
        "Token acquired for {}, expires in ~{} minutes",
        resource,
        ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
    );

    Ok(BearerToken::new(token, resource, ttl))
}
