//! Persistent settings state and its storage backends.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::record::CredentialRecord;
use crate::{Error, Result};

/// Everything credbridge persists: one credential per provider id, the
/// designation of the active source, and the consumer bindings that
/// config-file delivery serializes alongside the key.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsState {
    #[serde(default)]
    pub credentials: HashMap<String, CredentialRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_auth_source: Option<String>,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Consumer-side bindings written into the delivered config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    /// Extra KEY=VALUE entries delivered verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Storage backend for [`SettingsState`].
///
/// Implementations must make `save` atomic enough that a concurrent `load`
/// never observes a torn state.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<SettingsState>;
    async fn save(&self, state: &SettingsState) -> Result<()>;
}

/// JSON-file settings store.
///
/// Missing file loads as the default state. Saves create parent directories
/// and restrict the file to the owner on unix, since it holds tokens.
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Settings at the platform default location
    /// (`~/.credbridge/settings.json`).
    pub fn default_location() -> Result<Self> {
        let base = BaseDirs::new()
            .ok_or_else(|| Error::Settings("cannot determine home directory".into()))?;
        Ok(Self::new(
            base.home_dir().join(".credbridge").join("settings.json"),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn load(&self) -> Result<SettingsState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let state = serde_json::from_str(&contents)?;
                debug!(path = %self.path.display(), "loaded settings");
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, starting empty");
                Ok(SettingsState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &SettingsState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, contents).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms).await?;
        }

        debug!(path = %self.path.display(), "saved settings");
        Ok(())
    }
}

/// In-memory settings store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemorySettings {
    state: Mutex<SettingsState>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SettingsState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn load(&self) -> Result<SettingsState> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &SettingsState) -> Result<()> {
        *self.state.lock().await = state.clone();
        Ok(())
    }
}
