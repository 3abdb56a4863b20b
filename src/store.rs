//! Credential store: cached settings state with persist-then-return writes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::record::CredentialRecord;
use crate::settings::{ConsumerConfig, SettingsState, SettingsStore};
use crate::Result;

/// Read-modify-write wrapper over a [`SettingsStore`].
///
/// All reads come from an in-memory cache; every mutation persists through
/// the backing store before returning, so a caller that sees a mutation
/// complete can rely on it surviving a process restart. The write lock is
/// held across the save, which also serializes concurrent mutations.
pub struct CredentialStore {
    settings: Arc<dyn SettingsStore>,
    state: RwLock<SettingsState>,
}

impl CredentialStore {
    /// Load the persisted state and build the store around it.
    pub async fn load(settings: Arc<dyn SettingsStore>) -> Result<Self> {
        let state = settings.load().await?;
        Ok(Self {
            settings,
            state: RwLock::new(state),
        })
    }

    pub async fn record(&self, provider_id: &str) -> Option<CredentialRecord> {
        self.state.read().await.credentials.get(provider_id).cloned()
    }

    /// Snapshot of all stored records.
    pub async fn records(&self) -> HashMap<String, CredentialRecord> {
        self.state.read().await.credentials.clone()
    }

    pub async fn active_source(&self) -> Option<String> {
        self.state.read().await.active_auth_source.clone()
    }

    pub async fn consumer_config(&self) -> ConsumerConfig {
        self.state.read().await.consumer.clone()
    }

    /// Insert or replace a provider's record.
    pub async fn upsert(&self, provider_id: &str, record: CredentialRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.credentials.insert(provider_id.to_string(), record);
        self.settings.save(&state).await?;
        debug!(provider = provider_id, "credential stored");
        Ok(())
    }

    /// Remove a provider's record. When the removed provider was the active
    /// source, the designation is cleared in the same save.
    ///
    /// Returns whether a record was actually removed.
    pub async fn remove(&self, provider_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.credentials.remove(provider_id).is_some();
        let was_active = state.active_auth_source.as_deref() == Some(provider_id);
        if was_active {
            state.active_auth_source = None;
        }
        if removed || was_active {
            self.settings.save(&state).await?;
            debug!(provider = provider_id, was_active, "credential removed");
        }
        Ok(removed)
    }

    pub async fn set_active_source(&self, provider_id: Option<String>) -> Result<()> {
        let mut state = self.state.write().await;
        state.active_auth_source = provider_id;
        self.settings.save(&state).await?;
        Ok(())
    }

    pub async fn set_consumer_config(&self, consumer: ConsumerConfig) -> Result<()> {
        let mut state = self.state.write().await;
        state.consumer = consumer;
        self.settings.save(&state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use chrono::{Duration, Utc};

    fn record(token: &str) -> CredentialRecord {
        CredentialRecord::new(token, None, Utc::now() + Duration::hours(1))
    }

    #[tokio::test]
    async fn test_upsert_persists_before_returning() {
        let settings = Arc::new(MemorySettings::new());
        let store = CredentialStore::load(settings.clone() as Arc<dyn SettingsStore>)
            .await
            .unwrap();

        store.upsert("anthropic", record("tok-1")).await.unwrap();

        // A fresh load from the same backend must already see the write.
        let persisted = settings.load().await.unwrap();
        assert_eq!(persisted.credentials["anthropic"].access(), "tok-1");
    }

    #[tokio::test]
    async fn test_remove_clears_active_source_in_same_save() {
        let settings = Arc::new(MemorySettings::new());
        let store = CredentialStore::load(settings.clone() as Arc<dyn SettingsStore>)
            .await
            .unwrap();

        store.upsert("anthropic", record("a")).await.unwrap();
        store.upsert("openai-codex", record("b")).await.unwrap();
        store
            .set_active_source(Some("anthropic".into()))
            .await
            .unwrap();

        assert!(store.remove("anthropic").await.unwrap());
        assert_eq!(store.active_source().await, None);
        // Other records are untouched.
        assert!(store.record("openai-codex").await.is_some());

        let persisted = settings.load().await.unwrap();
        assert!(persisted.active_auth_source.is_none());
        assert!(!persisted.credentials.contains_key("anthropic"));
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let settings = Arc::new(MemorySettings::new());
        let store = CredentialStore::load(settings as Arc<dyn SettingsStore>)
            .await
            .unwrap();
        assert!(!store.remove("github-copilot").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_inactive_keeps_active_source() {
        let settings = Arc::new(MemorySettings::new());
        let store = CredentialStore::load(settings as Arc<dyn SettingsStore>)
            .await
            .unwrap();

        store.upsert("anthropic", record("a")).await.unwrap();
        store.upsert("google-gemini-cli", record("g")).await.unwrap();
        store
            .set_active_source(Some("anthropic".into()))
            .await
            .unwrap();

        store.remove("google-gemini-cli").await.unwrap();
        assert_eq!(store.active_source().await.as_deref(), Some("anthropic"));
    }
}
