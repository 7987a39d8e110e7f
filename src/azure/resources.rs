//! Resource Manager enumeration
//!
//! Lists the resource groups of a subscription and the resources inside a group,
//! following `nextLink` pagination.

use super::auth::BearerToken;
use super::http::AzureHttpClient;
use anyhow::Result;
use serde_json::Value;

const RESOURCES_API_VERSION: &str = "2017-05-10";

/// Resource group with its raw property bag
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    pub properties: Value,
}

impl From<&Value> for ResourceGroup {
    fn from(value: &Value) -> Self {
        Self {
            id: str_field(value, "id", "-"),
            name: str_field(value, "name", "-"),
            location: str_field(value, "location", "-"),
            properties: value.get("properties").cloned().unwrap_or(Value::Null),
        }
    }
}

/// Resource inside a group
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub location: String,
    pub properties: Value,
}

impl From<&Value> for Resource {
    fn from(value: &Value) -> Self {
        Self {
            id: str_field(value, "id", ""),
            name: str_field(value, "name", "-"),
            resource_type: str_field(value, "type", "-"),
            location: str_field(value, "location", "-"),
            properties: value.clone(),
        }
    }
}

fn str_field(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// Result of one page
pub struct PaginatedResult {
    pub items: Vec<Value>,
    pub next_link: Option<String>,
}

impl From<Value> for PaginatedResult {
    fn from(mut response: Value) -> Self {
        let items = match response.get_mut("value").map(Value::take) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let next_link = response
            .get("nextLink")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Self { items, next_link }
    }
}

/// Fetch every page of an ARM list endpoint
pub async fn fetch_all_pages(
    http: &AzureHttpClient,
    token: &BearerToken,
    url: &str,
    api_version: &str,
) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page: PaginatedResult = http
        .get_with_query(url, token.as_str(), &[("api-version", api_version)])
        .await?
        .into();

    loop {
        all_items.append(&mut page.items);

        let Some(next) = page.next_link.take() else {
            break;
        };
        // nextLink already carries api-version and the skip token
        page = http.get(&next, token.as_str()).await?.into();
    }

    Ok(all_items)
}

/// List the resource groups of a subscription
pub async fn list_resource_groups(
    http: &AzureHttpClient,
    token: &BearerToken,
    sub_url: &str,
) -> Result<Vec<ResourceGroup>> {
    let url = format!("{}/resourcegroups", sub_url.trim_end_matches('/'));
    let items = fetch_all_pages(http, token, &url, RESOURCES_API_VERSION).await?;

    let groups: Vec<ResourceGroup> = items.iter().map(ResourceGroup::from).collect();
    tracing::info!("Found {} resource groups", groups.len());
    Ok(groups)
}

/// List the resources of one group
pub async fn list_resources(
    http: &AzureHttpClient,
    token: &BearerToken,
    sub_url: &str,
    resource_group: &str,
) -> Result<Vec<Resource>> {
    let url = format!(
        "{}/resourceGroups/{}/resources",
        sub_url.trim_end_matches('/'),
        urlencoding::encode(resource_group)
    );
    let items = fetch_all_pages(http, token, &url, RESOURCES_API_VERSION).await?;

    let resources: Vec<Resource> = items
        .iter()
        .map(Resource::from)
        .filter(|r| !r.id.is_empty())
        .collect();
    tracing::debug!("Resource group {} has {} resources", resource_group, resources.len());
    Ok(resources)
}
