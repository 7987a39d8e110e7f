//! Shared fixtures: a mocked Azure (AAD, Key Vault, ARM, Monitor) on one wiremock server

#![allow(dead_code)]

use azmon_metrics::azure::environment::AzureEnvironment;
use azmon_metrics::config::InputStanza;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "tenant-1";
pub const SUBSCRIPTION: &str = "sub-1";

/// Endpoints that all resolve to the mock server
pub fn mock_environment(server: &MockServer) -> AzureEnvironment {
    AzureEnvironment {
        name: "Mock".to_string(),
        active_directory_endpoint_url: format!("{}/", server.uri()),
        active_directory_resource_id: "arm-audience".to_string(),
        resource_manager_endpoint_url: format!("{}/", server.uri()),
        key_vault_resource_id: "kv-audience".to_string(),
        key_vault_dns_suffix: server.uri(),
    }
}

/// Input with clear-text credentials
pub fn input() -> InputStanza {
    InputStanza {
        tenant_id: TENANT.to_string(),
        application_id: "kv-client".to_string(),
        application_key: "kv-secret".to_string(),
        subscription_id: SUBSCRIPTION.to_string(),
        vault_name: "kv".to_string(),
        secret_name: "arm-spn".to_string(),
        secret_version: "v1".to_string(),
        index: "main".to_string(),
        interval: "300".to_string(),
        sourcetype: "azure:metrics".to_string(),
        ..Default::default()
    }
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 7, 42).unwrap()
}

pub fn group_name(i: usize) -> String {
    format!("rg-{}", i)
}

pub fn resource_id(i: usize) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/app-{}",
        SUBSCRIPTION,
        group_name(i),
        i
    )
}

pub async fn mount_tokens(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/token", TENANT)))
        .and(body_string_contains("resource=kv-audience"))
        .and(body_string_contains("client_id=kv-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "kv-token",
            "expires_in": "3599"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/token", TENANT)))
        .and(body_string_contains("resource=arm-audience"))
        .and(body_string_contains("client_id=arm-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "arm-token",
            "expires_in": "3599"
        })))
        .mount(server)
        .await;
}

pub async fn mount_secret(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/secrets/arm-spn/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "arm-secret",
            "contentType": "arm-client"
        })))
        .mount(server)
        .await;
}

pub async fn mount_resource_groups(server: &MockServer, count: usize) {
    let groups: Vec<_> = (0..count)
        .map(|i| json!({"id": format!("/subscriptions/{}/resourceGroups/{}", SUBSCRIPTION, group_name(i)), "name": group_name(i)}))
        .collect();

    Mock::given(method("GET"))
        .and(path(format!("/subscriptions/{}/resourcegroups", SUBSCRIPTION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": groups})))
        .mount(server)
        .await;
}

/// One web app per group; `failing` groups answer 500
pub async fn mount_resources(server: &MockServer, count: usize, failing: &[usize]) {
    for i in 0..count {
        let mock = Mock::given(method("GET")).and(path(format!(
            "/subscriptions/{}/resourceGroups/{}/resources",
            SUBSCRIPTION,
            group_name(i)
        )));

        let response = if failing.contains(&i) {
            ResponseTemplate::new(500).set_body_json(json!({
                "error": {"code": "InternalServerError", "message": "boom"}
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": resource_id(i),
                    "name": format!("app-{}", i),
                    "type": "Microsoft.Web/sites",
                    "location": "westeurope"
                }]
            }))
        };

        mock.respond_with(response).mount(server).await;
    }
}

/// Every resource exposes one metric with one populated point
pub async fn mount_metrics(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"/providers/microsoft\.insights/metricDefinitions$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"name": {"value": "Requests", "localizedValue": "Requests"}}]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"/providers/microsoft\.insights/metrics$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": {"value": "Requests"},
                "unit": "Count",
                "timeseries": [{
                    "metadatavalues": [],
                    "data": [{"timeStamp": "2024-03-01T10:02:00Z", "total": 12.0}]
                }]
            }]
        })))
        .mount(server)
        .await;
}

/// Resource list of group `i` answered after `delay`
pub async fn mount_resources_delayed(server: &MockServer, i: usize, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{}/resourceGroups/{}/resources",
            SUBSCRIPTION,
            group_name(i)
        )))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "value": [{"id": resource_id(i), "name": format!("app-{}", i), "type": "Microsoft.Web/sites"}]
                }))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Metric definitions and values of resource `i`, each answered after `delay`
pub async fn mount_resource_metrics(server: &MockServer, i: usize, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!(
            "{}/providers/microsoft.insights/metricDefinitions",
            resource_id(i)
        )))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"value": [{"name": {"value": "Requests"}}]}))
                .set_delay(delay),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}/providers/microsoft.insights/metrics", resource_id(i))))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "value": [{
                        "name": {"value": "Requests"},
                        "unit": "Count",
                        "timeseries": [{"data": [{"timeStamp": "2024-03-01T10:02:00Z", "total": 1.0}]}]
                    }]
                }))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Mount a full healthy Azure with `groups` resource groups
pub async fn mount_azure(server: &MockServer, groups: usize, failing: &[usize]) {
    mount_tokens(server).await;
    mount_secret(server).await;
    mount_resource_groups(server, groups).await;
    mount_resources(server, groups, failing).await;
    mount_metrics(server).await;
}
