//! Integration tests for the Azure HTTP layer using wiremock
//!
//! These tests verify token acquisition, Key Vault reads and Resource Manager
//! pagination against mocked endpoints.

use azmon_metrics::azure::auth::{get_access_token, BearerToken};
use azmon_metrics::azure::http::{ApiError, AzureHttpClient};
use azmon_metrics::azure::keyvault::get_secret_from_keyvault;
use azmon_metrics::azure::resources::{list_resource_groups, list_resources};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{bearer_token, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token(value: &str) -> BearerToken {
    BearerToken::new(value, "test", Duration::from_secs(3600))
}

mod http_client_tests {
    use super::*;

    /// Test successful GET request returns parsed JSON
    #[tokio::test]
    async fn test_get_success_returns_json() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub/resourcegroups"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "rg-1"}, {"name": "rg-2"}]
            })))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let url = format!("{}/subscriptions/sub/resourcegroups", server.uri());
        let response = http.get(&url, "test-token").await.expect("Request should succeed");

        assert_eq!(response["value"].as_array().unwrap().len(), 2);
        assert_eq!(response["value"][0]["name"], "rg-1");
    }

    /// Test 403 response surfaces as a typed ApiError with the ARM message
    #[tokio::test]
    async fn test_403_returns_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/restricted/resourcegroups"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {
                    "code": "AuthorizationFailed",
                    "message": "The client does not have authorization"
                }
            })))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let url = format!("{}/subscriptions/restricted/resourcegroups", server.uri());
        let err = http.get(&url, "t").await.unwrap_err();

        let api = err.downcast_ref::<ApiError>().expect("Should be an ApiError");
        assert_eq!(api.status, 403);
        assert_eq!(
            api.message.as_deref(),
            Some("The client does not have authorization")
        );
    }

    /// Test empty success body maps to null
    #[tokio::test]
    async fn test_empty_response() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let response = http
            .get(&format!("{}/empty", server.uri()), "t")
            .await
            .expect("Request should succeed");
        assert!(response.is_null());
    }

    /// Test rate limiting (429) is an error, not retried
    #[tokio::test]
    async fn test_rate_limit_429_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rate-limited"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let err = http
            .get(&format!("{}/rate-limited", server.uri()), "t")
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ApiError>().unwrap().status, 429);
    }
}

mod token_tests {
    use super::*;

    /// Test client credentials grant posts the expected form
    #[tokio::test]
    async fn test_token_request_form() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=app-id"))
            .and(body_string_contains("client_secret=app-key"))
            .and(body_string_contains("resource=kv-audience"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": "3599",
                "access_token": "eyJ0eXAi"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let token = get_access_token(
            &http,
            "tenant-1",
            "app-id",
            "app-key",
            &format!("{}/", server.uri()),
            "kv-audience",
        )
        .await
        .expect("Token request should succeed");

        assert_eq!(token.as_str(), "eyJ0eXAi");
        assert_eq!(token.resource, "kv-audience");
        assert!(token.is_valid());
    }

    /// Test AAD rejection carries the error description
    #[tokio::test]
    async fn test_invalid_client_secret() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret is provided."
            })))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let err = get_access_token(&http, "tenant-1", "app-id", "", &server.uri(), "r")
            .await
            .unwrap_err();

        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, 401);
        assert!(api.message.as_deref().unwrap().starts_with("AADSTS7000215"));
        assert!(format!("{:#}", err).contains("Failed to get access token for r"));
    }

    /// Test a 200 without access_token is still a failure
    #[tokio::test]
    async fn test_token_response_without_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/t/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "Bearer"})))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        assert!(get_access_token(&http, "t", "a", "b", &server.uri(), "r")
            .await
            .is_err());
    }
}

mod keyvault_tests {
    use super::*;

    /// Test the secret's content type and value become the ARM credentials
    #[tokio::test]
    async fn test_secret_maps_to_arm_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/secrets/arm-spn/abc123"))
            .and(query_param("api-version", "2016-10-01"))
            .and(bearer_token("kv-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "arm-secret",
                "contentType": "arm-client-id",
                "id": "https://kv.vault.azure.net/secrets/arm-spn/abc123"
            })))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let creds = get_secret_from_keyvault(&http, &token("kv-token"), &server.uri(), "arm-spn", "abc123")
            .await
            .expect("Secret read should succeed");

        assert_eq!(creds.spn_client_id, "arm-client-id");
        assert_eq!(creds.spn_client_secret, "arm-secret");
        assert!(!format!("{:?}", creds).contains("arm-secret"));
    }

    /// Test an empty version reads the current secret
    #[tokio::test]
    async fn test_empty_version_reads_latest() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/secrets/arm-spn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": "s",
                "contentType": "c"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let creds = get_secret_from_keyvault(&http, &token("t"), &server.uri(), "arm-spn", "")
            .await
            .unwrap();
        assert_eq!(creds.spn_client_id, "c");
    }

    /// Test a secret without content type is rejected
    #[tokio::test]
    async fn test_secret_without_content_type() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/secrets/arm-spn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "s"})))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let err = get_secret_from_keyvault(&http, &token("t"), &server.uri(), "arm-spn", "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("contentType"));
    }
}

mod resource_tests {
    use super::*;

    /// Test pagination follows nextLink
    #[tokio::test]
    async fn test_resource_groups_follow_next_link() {
        let server = MockServer::start().await;
        let next_link = format!(
            "{}/subscriptions/sub/resourcegroups?api-version=2017-05-10&$skiptoken=page2",
            server.uri()
        );

        // First page
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub/resourcegroups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "rg-1"}, {"name": "rg-2"}],
                "nextLink": next_link
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        // Second page
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub/resourcegroups"))
            .and(query_param("$skiptoken", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "rg-3"}]
            })))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let sub_url = format!("{}/subscriptions/sub", server.uri());
        let groups = list_resource_groups(&http, &token("t"), &sub_url).await.unwrap();

        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["rg-1", "rg-2", "rg-3"]);
    }

    /// Test resources without an id are dropped
    #[tokio::test]
    async fn test_list_resources() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions/sub/resourceGroups/web/resources"))
            .and(query_param("api-version", "2017-05-10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "id": "/subscriptions/sub/resourceGroups/web/providers/Microsoft.Web/sites/app",
                        "name": "app",
                        "type": "Microsoft.Web/sites",
                        "location": "westeurope"
                    },
                    {"name": "ghost"}
                ]
            })))
            .mount(&server)
            .await;

        let http = AzureHttpClient::new().unwrap();
        let sub_url = format!("{}/subscriptions/sub", server.uri());
        let resources = list_resources(&http, &token("t"), &sub_url, "web").await.unwrap();

        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].resource_type, "Microsoft.Web/sites");
    }
}
