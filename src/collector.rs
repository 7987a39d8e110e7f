//! Metric collection pipeline
//!
//! Sequences one invocation: advance the time window, authenticate, resolve
//! the subscription's resources and forward their metrics. Each step is a
//! [`Stage`]; the first failing stage ends the invocation and is reported once.

use crate::azure::auth::{get_access_token, BearerToken};
use crate::azure::environment::{get_azure_environment, get_subscription_segment, AzureEnvironment};
use crate::azure::http::{ApiError, AzureHttpClient};
use crate::azure::keyvault::get_secret_from_keyvault;
use crate::azure::metrics::get_metrics_for_resources;
use crate::azure::resources::{list_resource_groups, list_resources, ResourceGroup};
use crate::checkpoint::{put_time_checkpoint, put_time_window, CheckpointStore, TimeWindow};
use crate::config::InputStanza;
use crate::credentials::StoreError;
use crate::fanout::{fan_out, FanOutResult, DEFAULT_FAN_OUT_LIMIT};
use crate::sink::EventSink;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::fmt;

/// Steps of one invocation, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PutTimeWindow,
    PutTimeCheckpoint,
    KeyVaultToken,
    GetSecretFromKeyVault,
    ResourceManagerToken,
    GetAzureEnvironment,
    GetSubscriptionSegment,
    GetResources,
    GetResourcesForRgs,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::PutTimeWindow,
        Stage::PutTimeCheckpoint,
        Stage::KeyVaultToken,
        Stage::GetSecretFromKeyVault,
        Stage::ResourceManagerToken,
        Stage::GetAzureEnvironment,
        Stage::GetSubscriptionSegment,
        Stage::GetResources,
        Stage::GetResourcesForRgs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::PutTimeWindow => "put_time_window",
            Stage::PutTimeCheckpoint => "put_time_checkpoint",
            Stage::KeyVaultToken => "get_access_token for key vault SPN",
            Stage::GetSecretFromKeyVault => "get_secret_from_keyvault",
            Stage::ResourceManagerToken => "get_access_token",
            Stage::GetAzureEnvironment => "get_azure_environment",
            Stage::GetSubscriptionSegment => "get_subscription_segment",
            Stage::GetResources => "get_resources",
            Stage::GetResourcesForRgs => "get_resources_for_rgs",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of one stage, carrying the underlying cause
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = self.source.as_ref();
        Some(cause)
    }
}

impl StageError {
    /// Short name of the underlying error type
    pub fn kind(&self) -> &'static str {
        error_kind(&self.source)
    }
}

fn error_kind(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<ApiError>().is_some() {
        "ApiError"
    } else if err.downcast_ref::<StoreError>().is_some() {
        "StoreError"
    } else if err.downcast_ref::<reqwest::Error>().is_some() {
        "HttpError"
    } else if err.downcast_ref::<serde_json::Error>().is_some() {
        "JsonError"
    } else if err.downcast_ref::<std::io::Error>().is_some() {
        "IoError"
    } else {
        "Error"
    }
}

/// Tag a result with the stage that produced it
pub trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T, E> StageExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError {
            stage,
            source: e.into(),
        })
    }
}

/// Outcome of the resource group fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    pub groups_succeeded: usize,
    pub groups_failed: usize,
    pub events: usize,
}

/// One invocation against one input
pub struct Collector<'a> {
    http: AzureHttpClient,
    input_name: &'a str,
    input: &'a InputStanza,
    checkpoints: &'a CheckpointStore,
    sink: &'a dyn EventSink,
    workers: usize,
    environment: Option<AzureEnvironment>,
    now: Option<DateTime<Utc>>,
}

impl<'a> Collector<'a> {
    /// `input` must already hold clear-text credentials
    pub fn new(
        http: AzureHttpClient,
        input_name: &'a str,
        input: &'a InputStanza,
        checkpoints: &'a CheckpointStore,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            http,
            input_name,
            input,
            checkpoints,
            sink,
            workers: DEFAULT_FAN_OUT_LIMIT,
            environment: None,
            now: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Use explicit endpoints instead of looking the input's cloud up by name
    pub fn with_environment(mut self, environment: AzureEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Pin the clock used for the time window
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn environment(&self) -> anyhow::Result<AzureEnvironment> {
        match &self.environment {
            Some(env) => Ok(env.clone()),
            None => get_azure_environment(self.input.environment_name()),
        }
    }

    /// Run every stage, stopping at the first failure
    pub async fn collect(&self) -> Result<FanOutSummary, StageError> {
        let input = self.input;
        let now = self.now.unwrap_or_else(Utc::now);

        let window = put_time_window(self.checkpoints, self.input_name, input.interval(), now)
            .at(Stage::PutTimeWindow)?;

        put_time_checkpoint(self.checkpoints, self.input_name, &window)
            .at(Stage::PutTimeCheckpoint)?;

        if window.is_empty() {
            tracing::info!("Time window for {} is empty, nothing to poll", self.input_name);
            return Ok(FanOutSummary::default());
        }

        let (env, kv_token) = async {
            let env = self.environment()?;
            let token = get_access_token(
                &self.http,
                &input.tenant_id,
                &input.application_id,
                &input.application_key,
                &env.active_directory_endpoint_url,
                &env.key_vault_resource_id,
            )
            .await?;
            Ok::<_, anyhow::Error>((env, token))
        }
        .await
        .at(Stage::KeyVaultToken)?;

        let arm_creds = get_secret_from_keyvault(
            &self.http,
            &kv_token,
            &env.key_vault_url(&input.vault_name),
            &input.secret_name,
            &input.secret_version,
        )
        .await
        .at(Stage::GetSecretFromKeyVault)?;

        let bearer_token = get_access_token(
            &self.http,
            &input.tenant_id,
            &arm_creds.spn_client_id,
            &arm_creds.spn_client_secret,
            &env.active_directory_endpoint_url,
            &env.active_directory_resource_id,
        )
        .await
        .at(Stage::ResourceManagerToken)?;

        let resource_manager = env.resource_manager_url().at(Stage::GetAzureEnvironment)?;

        let sub_url = subscription_url(&resource_manager, &input.subscription_id)
            .at(Stage::GetSubscriptionSegment)?;

        let resource_groups = list_resource_groups(&self.http, &bearer_token, &sub_url)
            .await
            .at(Stage::GetResources)?;

        let summary = get_resources_for_rgs(
            &self.http,
            &bearer_token,
            &sub_url,
            &resource_groups,
            &window,
            self.sink,
            self.workers,
        )
        .await
        .at(Stage::GetResourcesForRgs)?;

        tracing::info!(
            "Collected {} events from {} resource groups ({} failed)",
            summary.events,
            summary.groups_succeeded,
            summary.groups_failed
        );
        Ok(summary)
    }
}

fn subscription_url(resource_manager: &url::Url, subscription_id: &str) -> anyhow::Result<String> {
    if subscription_id.trim().is_empty() {
        anyhow::bail!("SubscriptionId is empty");
    }
    let url = resource_manager.join(&get_subscription_segment(subscription_id))?;
    Ok(url.to_string())
}

/// Enumerate each group's resources and fetch their metrics, with at most
/// `workers` groups in flight, forwarding events as each group completes.
///
/// A failing group is logged and counted; it never stops the others. Only a
/// sink that stops accepting events ends the fan-out early.
pub async fn get_resources_for_rgs(
    http: &AzureHttpClient,
    token: &BearerToken,
    sub_url: &str,
    resource_groups: &[ResourceGroup],
    window: &TimeWindow,
    sink: &dyn EventSink,
    workers: usize,
) -> anyhow::Result<FanOutSummary> {
    let names = resource_groups.iter().map(|rg| rg.name.clone());

    // Outer result: resource enumeration. Inner result: metric retrieval.
    let mut completions = std::pin::pin!(fan_out(names, workers, move |rg: String| async move {
        anyhow::ensure!(token.is_valid(), "Access token for {} has expired", token.resource);
        let resources = list_resources(http, token, sub_url, &rg).await?;
        Ok(get_metrics_for_resources(http, token, sub_url, &rg, &resources, window).await)
    }));

    let mut summary = FanOutSummary::default();
    while let Some(FanOutResult { item: resource_group, result }) = completions.next().await {
        let events = match result {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                tracing::error!(
                    "Metric retrieval for resource group {} failed: {:#}",
                    resource_group,
                    e
                );
                summary.groups_failed += 1;
                continue;
            }
            Err(e) => {
                tracing::error!(
                    "Resource group {} generated an exception: {:#}",
                    resource_group,
                    e
                );
                summary.groups_failed += 1;
                continue;
            }
        };

        for event in &events {
            sink.write_event(event).with_context(|| {
                format!("Failed to forward metrics of resource group {}", resource_group)
            })?;
        }
        summary.groups_succeeded += 1;
        summary.events += events.len();
    }

    Ok(summary)
}

/// Run one invocation; failures end up in the log, never in the caller
pub async fn get_metrics_for_subscription(collector: &Collector<'_>) -> Option<FanOutSummary> {
    match collector.collect().await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::error!(
                "Error caught in get_metrics_for_subscription, type: {}, value: {:#}, stage = {}",
                e.kind(),
                e.source,
                e.stage
            );
            None
        }
    }
}
