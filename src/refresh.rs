//! Single-flight refresh coordination.
//!
//! At most one refresh runs per provider at any time. Late callers await the
//! same shared future as the one that started it and observe the identical
//! outcome, success or failure, without a second network call. This matters
//! for providers with single-use rotating refresh tokens, where a duplicate
//! request would invalidate the token the first one just earned.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, warn};

use crate::provider::OAuthProvider;
use crate::record::CredentialRecord;
use crate::store::CredentialStore;
use crate::Error;

/// Refresh outcome shared between piggy-backing callers. `Clone` because a
/// single execution fans out to every waiter.
#[derive(Clone, Debug)]
pub(crate) enum RefreshError {
    /// No record stored for this provider.
    NotLoggedIn,
    /// Record exists but carries no refresh token.
    MissingRefreshToken,
    /// Provider or persistence failure, stringified for sharing.
    Failed(String),
}

type RefreshResult = std::result::Result<CredentialRecord, RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    in_flight: Arc<DashMap<String, SharedRefresh>>,
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Refresh `provider`'s credential, joining an in-flight refresh when one
    /// exists. The new record is persisted before any caller sees it.
    pub(crate) async fn refresh(
        &self,
        provider: Arc<dyn OAuthProvider>,
        store: Arc<CredentialStore>,
    ) -> RefreshResult {
        let id = provider.descriptor().id.clone();

        let future = match self.in_flight.entry(id.clone()) {
            Entry::Occupied(entry) => {
                debug!(provider = %id, "joining in-flight refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // The slot is cleared as the last step of the future itself,
                // so whichever waiter drives it to completion releases it.
                // The starting task may be dropped mid-await; a join must
                // still be able to finish the refresh and free the slot.
                let map = self.in_flight.clone();
                let slot = id.clone();
                let future = async move {
                    let outcome = run_refresh(provider, store).await;
                    map.remove(&slot);
                    outcome
                }
                .boxed()
                .shared();
                entry.insert(future.clone());
                future
            }
        };

        future.await
    }
}

async fn run_refresh(
    provider: Arc<dyn OAuthProvider>,
    store: Arc<CredentialStore>,
) -> RefreshResult {
    let id = provider.descriptor().id.clone();

    let Some(record) = store.record(&id).await else {
        return Err(RefreshError::NotLoggedIn);
    };

    match provider.refresh(&record).await {
        Ok(new_record) => {
            if let Err(e) = store.upsert(&id, new_record.clone()).await {
                warn!(provider = %id, error = %e, "refreshed but failed to persist");
                return Err(RefreshError::Failed(format!("persist failed: {e}")));
            }
            debug!(provider = %id, expires = %new_record.expires, "token refreshed");
            Ok(new_record)
        }
        Err(Error::MissingRefreshToken { .. }) => Err(RefreshError::MissingRefreshToken),
        Err(e) => {
            warn!(provider = %id, error = %e, "refresh failed");
            Err(RefreshError::Failed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InteractionPort;
    use crate::registry::{FlowKind, ProviderDescriptor};
    use crate::settings::{MemorySettings, SettingsStore};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Counts refresh calls and optionally fails them, with a small delay so
    /// concurrent callers genuinely overlap.
    struct CountingProvider {
        descriptor: ProviderDescriptor,
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingProvider {
        fn new(fail: bool) -> Self {
            Self {
                descriptor: ProviderDescriptor::new(
                    "counting",
                    "Counting",
                    FlowKind::ManualPaste,
                    false,
                    "COUNTING_API_KEY",
                ),
                calls: AtomicU32::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl OAuthProvider for CountingProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn login(
            &self,
            _port: &dyn InteractionPort,
            _cancel: &CancellationToken,
        ) -> Result<CredentialRecord> {
            unimplemented!("not used in refresh tests")
        }

        async fn refresh(&self, _record: &CredentialRecord) -> Result<CredentialRecord> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.fail {
                return Err(Error::refresh_failed("counting", "boom"));
            }
            Ok(CredentialRecord::new(
                format!("tok-{n}"),
                Some("ref".into()),
                Utc::now() + Duration::hours(1),
            ))
        }
    }

    async fn seeded_store() -> Arc<CredentialStore> {
        let settings = Arc::new(MemorySettings::new()) as Arc<dyn SettingsStore>;
        let store = Arc::new(CredentialStore::load(settings).await.unwrap());
        store
            .upsert(
                "counting",
                CredentialRecord::new("old", Some("ref".into()), Utc::now()),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let provider = Arc::new(CountingProvider::new(false));
        let store = seeded_store().await;
        let coordinator = Arc::new(RefreshCoordinator::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let provider = provider.clone() as Arc<dyn OAuthProvider>;
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                coordinator.refresh(provider, store).await
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap().access().to_string());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "tok-0"));
        // Persisted before anyone resolved.
        assert_eq!(store.record("counting").await.unwrap().access(), "tok-0");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let provider = Arc::new(CountingProvider::new(true));
        let store = seeded_store().await;
        let coordinator = Arc::new(RefreshCoordinator::new());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            let provider = provider.clone() as Arc<dyn OAuthProvider>;
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                coordinator.refresh(provider, store).await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, RefreshError::Failed(_)));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_refresh_again() {
        let provider = Arc::new(CountingProvider::new(false));
        let store = seeded_store().await;
        let coordinator = RefreshCoordinator::new();

        coordinator
            .refresh(provider.clone() as Arc<dyn OAuthProvider>, store.clone())
            .await
            .unwrap();
        coordinator
            .refresh(provider.clone() as Arc<dyn OAuthProvider>, store.clone())
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_aborted_caller_does_not_wedge_the_slot() {
        let provider = Arc::new(CountingProvider::new(false));
        let store = seeded_store().await;
        let coordinator = Arc::new(RefreshCoordinator::new());

        // Start a refresh and kill the task mid-await.
        let handle = tokio::spawn({
            let coordinator = coordinator.clone();
            let provider = provider.clone() as Arc<dyn OAuthProvider>;
            let store = store.clone();
            async move { coordinator.refresh(provider, store).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle.abort();
        let _ = handle.await;

        // Sequential refreshes afterwards must still run to completion and
        // produce fresh tokens, not replay a stale in-flight entry.
        let first = coordinator
            .refresh(provider.clone() as Arc<dyn OAuthProvider>, store.clone())
            .await
            .unwrap();
        let second = coordinator
            .refresh(provider.clone() as Arc<dyn OAuthProvider>, store.clone())
            .await
            .unwrap();

        assert_ne!(first.access(), second.access());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.record("counting").await.unwrap().access(), second.access());
    }

    #[tokio::test]
    async fn test_refresh_without_record() {
        let provider = Arc::new(CountingProvider::new(false));
        let settings = Arc::new(MemorySettings::new()) as Arc<dyn SettingsStore>;
        let store = Arc::new(CredentialStore::load(settings).await.unwrap());

        let err = RefreshCoordinator::new()
            .refresh(provider as Arc<dyn OAuthProvider>, store)
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::NotLoggedIn));
    }
}
