//! Azure cloud environments
//!
//! Endpoint sets for the public and sovereign Azure clouds.

use anyhow::{Context, Result};
use url::Url;

/// Endpoints for one Azure cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureEnvironment {
    pub name: String,
    /// AAD authority, with trailing slash
    pub active_directory_endpoint_url: String,
    /// Audience for Resource Manager tokens
    pub active_directory_resource_id: String,
    /// Resource Manager base URL, with trailing slash
    pub resource_manager_endpoint_url: String,
    /// Audience for Key Vault tokens
    pub key_vault_resource_id: String,
    /// Suffix appended to a vault name to build its URL
    pub key_vault_dns_suffix: String,
}

impl AzureEnvironment {
    fn new(
        name: &str,
        active_directory: &str,
        ad_resource: &str,
        resource_manager: &str,
        key_vault_resource: &str,
        key_vault_suffix: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            active_directory_endpoint_url: active_directory.to_string(),
            active_directory_resource_id: ad_resource.to_string(),
            resource_manager_endpoint_url: resource_manager.to_string(),
            key_vault_resource_id: key_vault_resource.to_string(),
            key_vault_dns_suffix: key_vault_suffix.to_string(),
        }
    }

    /// Base URL of a named vault
    ///
    /// A suffix that already carries a scheme (`http://host:port`) is used as-is,
    /// which lets tests and private endpoints point every vault at one host.
    pub fn key_vault_url(&self, vault_name: &str) -> String {
        if self.key_vault_dns_suffix.contains("://") {
            self.key_vault_dns_suffix.trim_end_matches('/').to_string()
        } else {
            format!("https://{}{}", vault_name, self.key_vault_dns_suffix)
        }
    }

    /// Resource Manager endpoint as a base that subscription paths join onto
    pub fn resource_manager_url(&self) -> Result<Url> {
        let url = Url::parse(&self.resource_manager_endpoint_url).with_context(|| {
            format!(
                "Invalid Resource Manager endpoint for {}: {}",
                self.name, self.resource_manager_endpoint_url
            )
        })?;
        if url.cannot_be_a_base() || !url.path().ends_with('/') {
            anyhow::bail!(
                "Resource Manager endpoint for {} must be a base URL ending in '/': {}",
                self.name,
                url
            );
        }
        Ok(url)
    }
}

/// Look up a cloud by name (`Azure`, `AzureChinaCloud`, `AzureUSGovernment`, `AzureGermanCloud`)
pub fn get_azure_environment(name: &str) -> Result<AzureEnvironment> {
    let env = match name {
        "Azure" | "AzureCloud" | "AzurePublicCloud" => AzureEnvironment::new(
            "Azure",
            "https://login.microsoftonline.com/",
            "https://management.core.windows.net/",
            "https://management.azure.com/",
            "https://vault.azure.net",
            ".vault.azure.net",
        ),
        "AzureChinaCloud" => AzureEnvironment::new(
            "AzureChinaCloud",
            "https://login.chinacloudapi.cn/",
            "https://management.core.chinacloudapi.cn/",
            "https://management.chinacloudapi.cn/",
            "https://vault.azure.cn",
            ".vault.azure.cn",
        ),
        "AzureUSGovernment" => AzureEnvironment::new(
            "AzureUSGovernment",
            "https://login.microsoftonline.us/",
            "https://management.core.usgovcloudapi.net/",
            "https://management.usgovcloudapi.net/",
            "https://vault.usgovcloudapi.net",
            ".vault.usgovcloudapi.net",
        ),
        "AzureGermanCloud" => AzureEnvironment::new(
            "AzureGermanCloud",
            "https://login.microsoftonline.de/",
            "https://management.core.cloudapi.de/",
            "https://management.microsoftazure.de/",
            "https://vault.microsoftazure.de",
            ".vault.microsoftazure.de",
        ),
        _ => return Err(anyhow::anyhow!("Unknown Azure environment: {}", name)),
    };

    Ok(env)
}

/// Path segment identifying a subscription
pub fn get_subscription_segment(subscription_id: &str) -> String {
    format!("subscriptions/{}", subscription_id.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_cloud_endpoints() {
        let env = get_azure_environment("Azure").unwrap();
        assert_eq!(env.active_directory_endpoint_url, "https://login.microsoftonline.com/");
        assert_eq!(env.resource_manager_endpoint_url, "https://management.azure.com/");
        assert_eq!(
            env.resource_manager_url().unwrap().as_str(),
            "https://management.azure.com/"
        );
    }

    #[test]
    fn test_resource_manager_url_must_be_a_base() {
        let mut env = get_azure_environment("AzureUSGovernment").unwrap();
        env.resource_manager_endpoint_url = "management.usgovcloudapi.net".to_string();
        assert!(env.resource_manager_url().is_err());

        env.resource_manager_endpoint_url = "https://management.usgovcloudapi.net/api".to_string();
        assert!(env.resource_manager_url().is_err());

        env.resource_manager_endpoint_url = "mailto:ops@example.com".to_string();
        assert!(env.resource_manager_url().is_err());
    }

    #[test]
    fn test_unknown_environment() {
        assert!(get_azure_environment("Mars").is_err());
    }

    #[test]
    fn test_key_vault_url() {
        let env = get_azure_environment("AzureChinaCloud").unwrap();
        assert_eq!(env.key_vault_url("kv1"), "https://kv1.vault.azure.cn");

        let mut local = env.clone();
        local.key_vault_dns_suffix = "http://127.0.0.1:8080/".to_string();
        assert_eq!(local.key_vault_url("kv1"), "http://127.0.0.1:8080");
    }
}
