//! Credential manager: the one front door for login, logout, key access,
//! refresh, and delivery fan-out.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delivery::{ActiveCredential, DeliverySnapshot, DeliveryStrategy};
use crate::interaction::InteractionPort;
use crate::provider::OAuthProvider;
use crate::record::CredentialRecord;
use crate::refresh::{RefreshCoordinator, RefreshError};
use crate::registry::{FlowKind, ProviderRegistry};
use crate::settings::{JsonFileSettings, SettingsStore};
use crate::store::CredentialStore;
use crate::{Error, Result};

/// How far ahead of expiry the background sweep refreshes.
const REFRESH_LOOKAHEAD_MINUTES: i64 = 10;

/// One row of [`CredentialManager::list_providers`] output.
#[derive(Clone, Debug)]
pub struct ProviderStatus {
    pub id: String,
    pub name: String,
    pub flow: FlowKind,
    pub logged_in: bool,
    pub active: bool,
    pub email: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}

/// Orchestrates providers, the store, the refresh coordinator, and delivery.
///
/// Everything here is cheap to share behind an `Arc`; the store serializes
/// writes internally and the coordinator deduplicates refreshes.
pub struct CredentialManager {
    registry: ProviderRegistry,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    strategies: Vec<Arc<dyn DeliveryStrategy>>,
}

#[derive(Default)]
pub struct CredentialManagerBuilder {
    settings: Option<Arc<dyn SettingsStore>>,
    registry: Option<ProviderRegistry>,
    strategies: Vec<Arc<dyn DeliveryStrategy>>,
}

impl CredentialManagerBuilder {
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a delivery strategy. Strategies are synced in registration order.
    pub fn strategy(mut self, strategy: Arc<dyn DeliveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub async fn build(self) -> Result<CredentialManager> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => Arc::new(JsonFileSettings::default_location()?) as Arc<dyn SettingsStore>,
        };
        let store = Arc::new(CredentialStore::load(settings).await?);
        Ok(CredentialManager {
            registry: self.registry.unwrap_or_else(ProviderRegistry::with_defaults),
            store,
            coordinator: RefreshCoordinator::new(),
            strategies: self.strategies,
        })
    }
}

impl CredentialManager {
    pub fn builder() -> CredentialManagerBuilder {
        CredentialManagerBuilder::default()
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    fn provider(&self, provider_id: &str) -> Result<Arc<dyn OAuthProvider>> {
        self.registry
            .get(provider_id)
            .ok_or_else(|| Error::UnknownProvider(provider_id.to_string()))
    }

    /// Run the provider's interactive login flow and persist the result.
    ///
    /// When no active source is designated yet, the fresh login becomes it.
    pub async fn login(
        &self,
        provider_id: &str,
        port: &dyn InteractionPort,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord> {
        let provider = self.provider(provider_id)?;

        let record = match provider.login(port, cancel).await {
            Ok(record) => record,
            Err(e @ (Error::LoginAborted | Error::StateMismatch | Error::LoginFailed { .. })) => {
                return Err(e);
            }
            Err(e) => return Err(Error::login_failed(provider_id, e.to_string())),
        };

        self.store.upsert(provider_id, record.clone()).await?;
        info!(provider = provider_id, "login complete");

        let active = self.store.active_source().await;
        if active.is_none() {
            self.store
                .set_active_source(Some(provider_id.to_string()))
                .await?;
            self.sync_delivery().await;
        } else if active.as_deref() == Some(provider_id) {
            self.sync_delivery().await;
        }

        Ok(record)
    }

    /// Drop the stored credential. Clearing the active provider also clears
    /// the designation, and delivery is re-synced either way.
    pub async fn logout(&self, provider_id: &str) -> Result<bool> {
        let removed = self.store.remove(provider_id).await?;
        if removed {
            info!(provider = provider_id, "logged out");
        }
        self.sync_delivery().await;
        Ok(removed)
    }

    /// Current api key for a provider, refreshing lazily when expired.
    ///
    /// `Ok(None)` means not logged in. A failed refresh clears the record
    /// and surfaces [`Error::TokenExpiredNeedsLogin`].
    pub async fn get_api_key(&self, provider_id: &str) -> Result<Option<String>> {
        let provider = self.provider(provider_id)?;

        let Some(record) = self.store.record(provider_id).await else {
            return Ok(None);
        };

        if !record.is_expired() {
            return Ok(Some(provider.api_key(&record)));
        }

        debug!(provider = provider_id, "token expired, refreshing");
        match self
            .coordinator
            .refresh(provider.clone(), self.store.clone())
            .await
        {
            Ok(fresh) => {
                if self.store.active_source().await.as_deref() == Some(provider_id) {
                    self.sync_delivery().await;
                }
                Ok(Some(provider.api_key(&fresh)))
            }
            Err(RefreshError::NotLoggedIn) => Ok(None),
            Err(e) => {
                self.clear_after_fatal_refresh(provider_id, &e).await;
                Err(Error::TokenExpiredNeedsLogin {
                    provider: provider_id.to_string(),
                })
            }
        }
    }

    /// Force-refresh the active provider's token regardless of expiry.
    ///
    /// Returns the provider id and fresh api key, or `None` when no active
    /// credential exists. Used by the consumer wrapper after a 401/403.
    pub async fn force_refresh_active_token(&self) -> Result<Option<(String, String)>> {
        let Some(provider_id) = self.store.active_source().await else {
            return Ok(None);
        };
        let provider = self.provider(&provider_id)?;

        match self
            .coordinator
            .refresh(provider.clone(), self.store.clone())
            .await
        {
            Ok(fresh) => {
                self.sync_delivery().await;
                Ok(Some((provider_id, provider.api_key(&fresh))))
            }
            Err(RefreshError::NotLoggedIn) => Ok(None),
            Err(e) => {
                self.clear_after_fatal_refresh(&provider_id, &e).await;
                Err(Error::TokenExpiredNeedsLogin {
                    provider: provider_id,
                })
            }
        }
    }

    /// Refresh every stored credential expiring within the look-ahead
    /// window. Failures are logged and the records retained; the next sweep
    /// or a lazy access decides their fate. Returns how many were refreshed.
    pub async fn refresh_all_if_needed(&self) -> usize {
        let window = Duration::minutes(REFRESH_LOOKAHEAD_MINUTES);
        let records = self.store.records().await;
        let active = self.store.active_source().await;

        let mut refreshed = 0usize;
        let mut active_changed = false;

        for (provider_id, record) in records {
            if !record.expires_within(window) {
                continue;
            }
            let Some(provider) = self.registry.get(&provider_id) else {
                warn!(provider = %provider_id, "stored credential for unregistered provider");
                continue;
            };

            debug!(provider = %provider_id, "sweep refresh");
            match self
                .coordinator
                .refresh(provider, self.store.clone())
                .await
            {
                Ok(_) => {
                    refreshed += 1;
                    if active.as_deref() == Some(provider_id.as_str()) {
                        active_changed = true;
                    }
                }
                Err(e) => {
                    warn!(provider = %provider_id, error = ?e, "sweep refresh failed, keeping record");
                }
            }
        }

        if active_changed {
            self.sync_delivery().await;
        }
        refreshed
    }

    /// Status of every registered provider, sorted by id.
    pub async fn list_providers(&self) -> Vec<ProviderStatus> {
        let records = self.store.records().await;
        let active = self.store.active_source().await;

        self.registry
            .descriptors()
            .into_iter()
            .map(|descriptor| {
                let record = records.get(&descriptor.id);
                ProviderStatus {
                    logged_in: record.is_some(),
                    active: active.as_deref() == Some(descriptor.id.as_str()),
                    email: record.and_then(|r| r.email.clone()),
                    expires: record.map(|r| r.expires),
                    id: descriptor.id,
                    name: descriptor.name,
                    flow: descriptor.flow,
                }
            })
            .collect()
    }

    pub async fn active_source(&self) -> Option<String> {
        self.store.active_source().await
    }

    /// Designate (or clear) the active provider and re-sync delivery.
    pub async fn set_active_source(&self, provider_id: Option<String>) -> Result<()> {
        if let Some(id) = &provider_id {
            if !self.registry.contains(id) {
                return Err(Error::UnknownProvider(id.clone()));
            }
        }
        self.store.set_active_source(provider_id).await?;
        self.sync_delivery().await;
        Ok(())
    }

    async fn clear_after_fatal_refresh(&self, provider_id: &str, error: &RefreshError) {
        warn!(provider = provider_id, error = ?error, "refresh failed fatally, clearing credential");
        if let Err(e) = self.store.remove(provider_id).await {
            warn!(provider = provider_id, error = %e, "failed to clear credential");
        }
        self.sync_delivery().await;
    }

    /// Fan the current active credential out to every delivery strategy.
    /// A failing strategy is logged and does not block the others.
    pub async fn sync_delivery(&self) {
        if self.strategies.is_empty() {
            return;
        }
        let snapshot = self.delivery_snapshot().await;
        for strategy in &self.strategies {
            if let Err(e) = strategy.sync(&snapshot).await {
                warn!(strategy = strategy.name(), error = %e, "delivery sync failed");
            }
        }
    }

    async fn delivery_snapshot(&self) -> DeliverySnapshot {
        let consumer = self.store.consumer_config().await;
        let active = match self.store.active_source().await {
            Some(provider_id) => {
                match (
                    self.registry.get(&provider_id),
                    self.store.record(&provider_id).await,
                ) {
                    (Some(provider), Some(record)) => Some(ActiveCredential {
                        env_key: provider.descriptor().env_key.clone(),
                        token: record.access().to_string(),
                        api_key: provider.api_key(&record),
                        project_id: record.project_id.clone(),
                        provider_id,
                    }),
                    _ => None,
                }
            }
            None => None,
        };
        DeliverySnapshot { active, consumer }
    }
}
