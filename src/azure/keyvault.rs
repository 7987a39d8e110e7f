//! Key Vault secret access
//!
//! The Resource Manager service principal lives in a Key Vault secret: the
//! secret's content type holds the application id and its value holds the key.

use super::auth::BearerToken;
use super::http::AzureHttpClient;
use anyhow::{Context, Result};

const KEY_VAULT_API_VERSION: &str = "2016-10-01";

/// Service principal used against Resource Manager
#[derive(Clone)]
pub struct ArmCredentials {
    pub spn_client_id: String,
    pub spn_client_secret: String,
}

impl std::fmt::Debug for ArmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmCredentials")
            .field("spn_client_id", &self.spn_client_id)
            .field("spn_client_secret", &"<redacted>")
            .finish()
    }
}

/// Read one secret version from a vault
///
/// An empty `secret_version` resolves to the current version.
pub async fn get_secret_from_keyvault(
    http: &AzureHttpClient,
    token: &BearerToken,
    vault_url: &str,
    secret_name: &str,
    secret_version: &str,
) -> Result<ArmCredentials> {
    let mut url = format!(
        "{}/secrets/{}",
        vault_url.trim_end_matches('/'),
        urlencoding::encode(secret_name.trim())
    );
    if !secret_version.trim().is_empty() {
        url.push('/');
        url.push_str(&urlencoding::encode(secret_version.trim()));
    }

    let secret = http
        .get_with_query(&url, token.as_str(), &[("api-version", KEY_VAULT_API_VERSION)])
        .await
        .with_context(|| format!("Failed to read secret {} from key vault", secret_name))?;

    let spn_client_id = secret
        .get("contentType")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .context("Key vault secret has no contentType (expected the application id)")?;

    let spn_client_secret = secret
        .get("value")
        .and_then(|v| v.as_str())
        .context("Key vault secret has no value")?;

    tracing::info!("Read resource manager credentials from secret {}", secret_name);

    Ok(ArmCredentials {
        spn_client_id: spn_client_id.to_string(),
        spn_client_secret: spn_client_secret.to_string(),
    })
}
