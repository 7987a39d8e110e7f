//! Azure Monitor metric retrieval
//!
//! For each resource: discover its metric definitions, then pull the time
//! series for the current window and flatten every data point into an event.

use super::auth::BearerToken;
use super::http::{ApiError, AzureHttpClient};
use super::resources::Resource;
use crate::checkpoint::TimeWindow;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

const METRICS_API_VERSION: &str = "2018-01-01";

/// Azure Monitor rejects more than this many names in one `metricnames` query
pub const MAX_METRICS_PER_REQUEST: usize = 20;

const METRIC_INTERVAL: &str = "PT1M";
const METRIC_AGGREGATIONS: &str = "Average,Minimum,Maximum,Total,Count";

/// One data point of one metric of one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    pub resource_id: String,
    pub resource_group: String,
    pub resource_name: String,
    pub resource_type: String,
    pub metric_name: String,
    pub unit: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<f64>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub dimensions: Map<String, Value>,
}

/// Resource types without Azure Monitor support answer 400 or 404
fn is_unsupported(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .map(|api| api.status == StatusCode::BAD_REQUEST || api.status == StatusCode::NOT_FOUND)
        .unwrap_or(false)
}

/// Resource Manager base URL (with trailing slash) from a subscription URL
fn resource_manager_base(sub_url: &str) -> &str {
    match sub_url.find("subscriptions/") {
        Some(idx) => &sub_url[..idx],
        None => sub_url,
    }
}

/// `metricnames` value; a comma inside a name is sent as `%2`
fn metric_names_param(metric_names: &[String]) -> String {
    metric_names
        .iter()
        .map(|name| name.replace(',', "%2"))
        .collect::<Vec<_>>()
        .join(",")
}

fn resource_url(sub_url: &str, resource_id: &str) -> String {
    format!(
        "{}/{}",
        resource_manager_base(sub_url).trim_end_matches('/'),
        resource_id.trim_start_matches('/')
    )
}

/// Names of the metrics a resource exposes
pub async fn get_metric_names(
    http: &AzureHttpClient,
    token: &BearerToken,
    sub_url: &str,
    resource: &Resource,
) -> Result<Vec<String>> {
    let url = format!(
        "{}/providers/microsoft.insights/metricDefinitions",
        resource_url(sub_url, &resource.id)
    );
    let response = http
        .get_with_query(&url, token.as_str(), &[("api-version", METRICS_API_VERSION)])
        .await
        .with_context(|| format!("Failed to get metric definitions for {}", resource.name))?;

    let names = response
        .get("value")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|def| def.get("name")?.get("value")?.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(names)
}

/// Fetch one batch of metrics and turn the response into events
pub async fn get_metrics(
    http: &AzureHttpClient,
    token: &BearerToken,
    sub_url: &str,
    resource_group: &str,
    resource: &Resource,
    metric_names: &[String],
    window: &TimeWindow,
) -> Result<Vec<MetricEvent>> {
    let url = format!(
        "{}/providers/microsoft.insights/metrics",
        resource_url(sub_url, &resource.id)
    );
    let timespan = window.timespan();
    let names = metric_names_param(metric_names);

    let response = http
        .get_with_query(
            &url,
            token.as_str(),
            &[
                ("timespan", timespan.as_str()),
                ("interval", METRIC_INTERVAL),
                ("aggregation", METRIC_AGGREGATIONS),
                ("metricnames", names.as_str()),
                ("api-version", METRICS_API_VERSION),
            ],
        )
        .await
        .with_context(|| format!("Failed to get metrics for {}", resource.name))?;

    Ok(events_from_response(&response, resource_group, resource))
}

/// Flatten a metrics response into one event per populated data point
pub fn events_from_response(
    response: &Value,
    resource_group: &str,
    resource: &Resource,
) -> Vec<MetricEvent> {
    let mut events = Vec::new();

    let Some(metrics) = response.get("value").and_then(|v| v.as_array()) else {
        return events;
    };

    for metric in metrics {
        let metric_name = metric
            .get("name")
            .and_then(|n| n.get("value"))
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let unit = metric.get("unit").and_then(|v| v.as_str()).unwrap_or("-");

        let series = metric
            .get("timeseries")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for ts in series {
            let dimensions = dimensions_of(ts);
            let points = ts
                .get("data")
                .and_then(|v| v.as_array())
                .map(Vec::as_slice)
                .unwrap_or_default();

            for point in points {
                let value = |key: &str| point.get(key).and_then(|v| v.as_f64());
                let event = MetricEvent {
                    resource_id: resource.id.clone(),
                    resource_group: resource_group.to_string(),
                    resource_name: resource.name.clone(),
                    resource_type: resource.resource_type.clone(),
                    metric_name: metric_name.to_string(),
                    unit: unit.to_string(),
                    timestamp: point
                        .get("timeStamp")
                        .and_then(|v| v.as_str())
                        .unwrap_or("-")
                        .to_string(),
                    average: value("average"),
                    minimum: value("minimum"),
                    maximum: value("maximum"),
                    total: value("total"),
                    count: value("count"),
                    dimensions: dimensions.clone(),
                };

                // Points with no aggregate carry no data for the interval
                if event.average.is_none()
                    && event.minimum.is_none()
                    && event.maximum.is_none()
                    && event.total.is_none()
                    && event.count.is_none()
                {
                    continue;
                }
                events.push(event);
            }
        }
    }

    events
}

fn dimensions_of(timeseries: &Value) -> Map<String, Value> {
    let mut dims = Map::new();
    let Some(values) = timeseries.get("metadatavalues").and_then(|v| v.as_array()) else {
        return dims;
    };

    for entry in values {
        let key = entry
            .get("name")
            .and_then(|n| n.get("value"))
            .and_then(|v| v.as_str());
        if let Some(key) = key {
            let value = entry.get("value").cloned().unwrap_or(Value::Null);
            dims.insert(key.to_string(), value);
        }
    }
    dims
}

/// Pull every metric of every resource in a group
pub async fn get_metrics_for_resources(
    http: &AzureHttpClient,
    token: &BearerToken,
    sub_url: &str,
    resource_group: &str,
    resources: &[Resource],
    window: &TimeWindow,
) -> Result<Vec<MetricEvent>> {
    let mut events = Vec::new();

    for resource in resources {
        let names = match get_metric_names(http, token, sub_url, resource).await {
            Ok(names) => names,
            Err(e) if is_unsupported(&e) => {
                tracing::debug!("{} does not support metrics: {:#}", resource.id, e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if names.is_empty() {
            tracing::debug!("No metric definitions for {}, skipping", resource.id);
            continue;
        }

        for batch in names.chunks(MAX_METRICS_PER_REQUEST) {
            let batch_events =
                get_metrics(http, token, sub_url, resource_group, resource, batch, window).await?;
            events.extend(batch_events);
        }
    }

    tracing::debug!("Resource group {}: {} metric events", resource_group, events.len());
    Ok(events)
}
