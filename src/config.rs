//! Configuration Management
//!
//! The input definition handed over by the host scheduler, and the visible
//! input configuration that credential masking rewrites.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sentinel shown in the visible configuration once a secret is stored
pub const MASK: &str = "********";

/// Interval used when an input does not set one
const DEFAULT_INTERVAL_SECS: u64 = 60;

/// One configured input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InputStanza {
    #[serde(rename = "SPNTenantID", default)]
    pub tenant_id: String,
    #[serde(rename = "SPNApplicationId", default)]
    pub application_id: String,
    #[serde(rename = "SPNApplicationKey", default)]
    pub application_key: String,
    #[serde(rename = "SubscriptionId", default)]
    pub subscription_id: String,
    #[serde(rename = "vaultName", default)]
    pub vault_name: String,
    #[serde(rename = "secretName", default)]
    pub secret_name: String,
    #[serde(rename = "secretVersion", default)]
    pub secret_version: String,
    /// Azure cloud name, `Azure` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default)]
    pub index: String,
    /// Polling interval in seconds
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub sourcetype: String,
    /// Keys owned by the scheduler (`disabled`, `host`, ...), kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputStanza {
    /// Polling interval, falling back to the default on empty or invalid values
    pub fn interval(&self) -> Duration {
        let secs = self
            .interval
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn environment_name(&self) -> &str {
        self.environment
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Azure")
    }
}

/// Everything the scheduler supplies for one invocation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InputDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputStanza>,
    /// Top-level keys not used here, kept so a rewrite does not drop them
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputDefinition {
    /// Default input definition path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("azmon").join("inputs.json"))
    }

    /// Parse an input definition from JSON text
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse input definition")
    }

    /// Load an input definition from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input definition {:?}", path))?;
        Self::parse(&content)
    }

    /// Save the input definition to disk, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, content).with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// The scheduler sends a map of inputs but only ever one element
    pub fn single_input(&self) -> Result<(&str, &InputStanza)> {
        let mut iter = self.inputs.iter();
        let (name, stanza) = iter.next().context("Input definition has no inputs")?;
        if iter.next().is_some() {
            tracing::warn!(
                "Input definition has {} inputs, only {} is processed",
                self.inputs.len(),
                name
            );
        }
        Ok((name.as_str(), stanza))
    }
}

/// Fixed credential store labels
pub const APP_ID_LABEL: &str = "AzureMonitorMetricsAppID";
pub const APP_KEY_LABEL: &str = "AzureMonitorMetricsAppKey";

/// State of a secret field in the visible configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialField {
    /// Already stored in the credential store under this label
    Stored(String),
    /// Still in clear text
    Clear(String),
}

impl CredentialField {
    /// Interpret a visible value for the field stored under `label`
    pub fn from_visible(value: &str, label: &str) -> Self {
        if value == MASK {
            Self::Stored(label.to_string())
        } else {
            Self::Clear(value.to_string())
        }
    }

    /// Value as it may appear in the visible configuration
    pub fn visible(&self) -> &str {
        match self {
            Self::Stored(_) => MASK,
            Self::Clear(value) => value,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

impl InputStanza {
    pub fn application_id_field(&self) -> CredentialField {
        CredentialField::from_visible(&self.application_id, APP_ID_LABEL)
    }

    pub fn application_key_field(&self) -> CredentialField {
        CredentialField::from_visible(&self.application_key, APP_KEY_LABEL)
    }

    /// Copy of this stanza with both secrets replaced by the mask
    pub fn masked(&self) -> Self {
        Self {
            application_id: CredentialField::Stored(APP_ID_LABEL.to_string())
                .visible()
                .to_string(),
            application_key: CredentialField::Stored(APP_KEY_LABEL.to_string())
                .visible()
                .to_string(),
            ..self.clone()
        }
    }
}
