//! Azure API interaction module
//!
//! Thin wrappers over the Azure REST endpoints the connector consumes:
//! AAD token issuance, Key Vault secrets, Resource Manager enumeration and
//! Azure Monitor metrics.
//!
//! # Module Structure
//!
//! - [`auth`] - Client credentials token acquisition
//! - [`environment`] - Endpoint sets of the Azure clouds
//! - [`http`] - HTTP utilities for REST API calls
//! - [`keyvault`] - Key Vault secret access
//! - [`metrics`] - Metric definitions and time series
//! - [`resources`] - Resource group and resource listing
//!
//! # Example
//!
//! ```ignore
//! use azmon_metrics::azure::{auth, environment, http::AzureHttpClient, resources};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let http = AzureHttpClient::new()?;
//!     let env = environment::get_azure_environment("Azure")?;
//!     let token = auth::get_access_token(
//!         &http, "tenant", "client", "secret",
//!         &env.active_directory_endpoint_url, &env.active_directory_resource_id,
//!     ).await?;
//!     let sub_url = env.resource_manager_url()?.join("subscriptions/sub")?;
//!     let groups = resources::list_resource_groups(&http, &token, sub_url.as_str()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod environment;
pub mod http;
pub mod keyvault;
pub mod metrics;
pub mod resources;
