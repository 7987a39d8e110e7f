//! Credential Management
//!
//! Moves the input's service principal secrets out of the visible configuration
//! into a credential store, and reads them back on later runs.
//!
//! Everything here is best-effort: failures are logged and swallowed, and the
//! caller gets whatever values could be resolved. A bad or missing secret then
//! surfaces at token acquisition.

use crate::config::{CredentialField, InputDefinition, InputStanza, APP_ID_LABEL, APP_KEY_LABEL};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Credential store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not connect to credential store: {0}")]
    Connection(String),
    #[error("did not find {0} in credential store")]
    NotFound(String),
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential store is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

/// Secure storage for clear-text secrets, keyed by label
pub trait CredentialStore: Send + Sync {
    fn contains(&self, label: &str) -> Result<bool, StoreError>;
    fn get(&self, label: &str) -> Result<String, StoreError>;
    fn create(&self, label: &str, secret: &str) -> Result<(), StoreError>;
    fn delete(&self, label: &str) -> Result<(), StoreError>;
}

/// Writable view of the visible input configuration
pub trait InputConfigStore: Send + Sync {
    fn update_input(&self, name: &str, stanza: &InputStanza) -> Result<()>;
}

// =============================================================================
// File-backed credential store
// =============================================================================

/// JSON map of label to secret, readable only by the owner
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Default store location
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("azmon").join("credentials.json"))
    }

    /// Open (and create the directory of) a store.
    /// An existing store file is restricted to its owner.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if path.is_dir() {
            return Err(StoreError::Connection(format!("{:?} is a directory", path)));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connection(format!("{:?}: {}", parent, e)))?;
        }
        if path.is_file() {
            restrict_to_owner(&path)?;
        }
        Ok(Self { path })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write to an owner-only temp file, then rename over the store
    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<(), StoreError> {
        use std::io::Write;

        let content = serde_json::to_vec_pretty(secrets)?;
        let tmp = self.tmp_path();

        let mut options = std::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        // A leftover temp file keeps whatever mode it was created with
        restrict_to_owner(&tmp)?;
        file.write_all(&content)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn contains(&self, label: &str) -> Result<bool, StoreError> {
        Ok(self.read_all()?.contains_key(label))
    }

    fn get(&self, label: &str) -> Result<String, StoreError> {
        self.read_all()?
            .remove(label)
            .ok_or_else(|| StoreError::NotFound(label.to_string()))
    }

    fn create(&self, label: &str, secret: &str) -> Result<(), StoreError> {
        let mut secrets = self.read_all()?;
        secrets.insert(label.to_string(), secret.to_string());
        self.write_all(&secrets)
    }

    fn delete(&self, label: &str) -> Result<(), StoreError> {
        let mut secrets = self.read_all()?;
        if secrets.remove(label).is_none() {
            return Err(StoreError::NotFound(label.to_string()));
        }
        self.write_all(&secrets)
    }
}

// =============================================================================
// Visible configuration stores
// =============================================================================

/// Rewrites the stanza inside an input definition file
#[derive(Debug, Clone)]
pub struct FileInputConfigStore {
    path: PathBuf,
}

impl FileInputConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InputConfigStore for FileInputConfigStore {
    fn update_input(&self, name: &str, stanza: &InputStanza) -> Result<()> {
        let mut definition = InputDefinition::load(&self.path)?;
        let Some(entry) = definition.inputs.get_mut(name) else {
            anyhow::bail!("Input {} not found in {:?}", name, self.path);
        };
        *entry = stanza.clone();
        definition.save(&self.path)
    }
}

/// Input definitions piped in on stdin have nothing to rewrite
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyInputConfig;

impl InputConfigStore for ReadOnlyInputConfig {
    fn update_input(&self, name: &str, _stanza: &InputStanza) -> Result<()> {
        tracing::warn!(
            "Visible configuration of {} is read-only, secrets were not masked",
            name
        );
        Ok(())
    }
}

// =============================================================================
// Masking workflow
// =============================================================================

/// Replace whatever is stored under `label` with `secret`.
/// Returns true when the new value was written.
pub fn create_or_update_secret(store: &dyn CredentialStore, label: &str, secret: &str) -> bool {
    let mut step = "reference";
    let outcome = store.contains(label).and_then(|present| {
        if present {
            step = "delete";
            store.delete(label)?;
        }
        Ok(())
    });
    if let Err(e) = outcome {
        tracing::error!("Error at step {} in create_or_update_secret for {}: {}", step, label, e);
    }

    match store.create(label, secret) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Error at step create in create_or_update_secret for {}: {}", label, e);
            false
        }
    }
}

/// Read the stored application id and key.
///
/// Both labels must exist; a failure reading the values themselves is logged and
/// yields empty strings.
pub fn get_app_id_and_key(store: &dyn CredentialStore) -> Result<(String, String), StoreError> {
    for label in [APP_ID_LABEL, APP_KEY_LABEL] {
        if !store.contains(label)? {
            return Err(StoreError::NotFound(label.to_string()));
        }
    }

    let read = || -> Result<(String, String), StoreError> {
        Ok((store.get(APP_ID_LABEL)?, store.get(APP_KEY_LABEL)?))
    };

    match read() {
        Ok(pair) => Ok(pair),
        Err(e) => {
            tracing::error!("Error caught in get_app_id_and_key: {}", e);
            Ok((String::new(), String::new()))
        }
    }
}

/// Write the masked form of `stanza` to the visible configuration
pub fn mask_id_and_key(config_store: &dyn InputConfigStore, name: &str, stanza: &InputStanza) {
    if let Err(e) = config_store.update_input(name, &stanza.masked()) {
        tracing::error!("Error caught in mask_id_and_key: {:#}", e);
    }
}

/// Resolve clear-text credentials for an input.
///
/// Returns a working copy of `stanza` holding the clear application id and key.
/// The caller's stanza is never modified. On first sight of clear-text secrets
/// they are stored and the visible configuration is masked.
pub fn get_or_store_secrets(
    name: &str,
    stanza: &InputStanza,
    store: &dyn CredentialStore,
    config_store: &dyn InputConfigStore,
) -> InputStanza {
    let mut working = stanza.clone();

    match (stanza.application_id_field(), stanza.application_key_field()) {
        (CredentialField::Stored(_), _) => match get_app_id_and_key(store) {
            Ok((app_id, app_key)) => {
                working.application_id = app_id;
                working.application_key = app_key;
            }
            Err(e) => {
                tracing::error!("Error caught in get_or_store_secrets: {}", e);
                working.application_id.clear();
                working.application_key.clear();
            }
        },
        (CredentialField::Clear(app_id), key) => {
            let app_key = match key {
                CredentialField::Clear(value) => Some(value),
                // Key masked but id in clear: recover the key from the store
                CredentialField::Stored(label) => match store.get(&label) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!("Error caught in get_or_store_secrets: {}", e);
                        None
                    }
                },
            };

            let id_stored = create_or_update_secret(store, APP_ID_LABEL, &app_id);
            // An unrecoverable key is never replaced by an empty one
            let key_stored = match &app_key {
                Some(value) => create_or_update_secret(store, APP_KEY_LABEL, value),
                None => false,
            };

            if id_stored && key_stored {
                mask_id_and_key(config_store, name, stanza);
                tracing::info!("Stored credentials of {} and masked its configuration", name);
            } else {
                tracing::warn!(
                    "Credentials of {} were not fully stored, leaving configuration unmasked",
                    name
                );
            }

            working.application_id = app_id;
            working.application_key = app_key.unwrap_or_default();
        }
    }

    working
}
