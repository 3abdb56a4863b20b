//! Identity-provider implementations and shared flow building blocks.

pub mod callback;
pub mod device;
pub mod pkce;

mod anthropic;
mod github_copilot;
mod google;
mod openai_codex;

pub use anthropic::{AnthropicEndpoints, AnthropicProvider};
pub use callback::CallbackListener;
pub use github_copilot::{CopilotEndpoints, GithubCopilotProvider};
pub use google::{GoogleEndpoints, GoogleProvider, GoogleVariant};
pub use openai_codex::{CodexEndpoints, OpenaiCodexProvider};
pub use pkce::PkceChallenge;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::interaction::InteractionPort;
use crate::record::CredentialRecord;
use crate::registry::ProviderDescriptor;
use crate::Result;

/// One identity provider's login, refresh, and key-shaping behavior.
///
/// Implementations never touch the store; the manager and refresh
/// coordinator persist whatever records they return.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Run the interactive login flow to completion.
    ///
    /// Must honor `cancel` at every blocking step and release any held
    /// resources (callback sockets) on all exit paths.
    async fn login(
        &self,
        port: &dyn InteractionPort,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord>;

    /// Exchange the stored record for a fresh one, without user interaction.
    async fn refresh(&self, record: &CredentialRecord) -> Result<CredentialRecord>;

    /// Shape the stored record into the string the consumer expects.
    fn api_key(&self, record: &CredentialRecord) -> String {
        record.access().to_string()
    }
}

/// Standard OAuth token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry, falling back to `fallback_secs` when the provider
    /// omits `expires_in`.
    pub fn expires_at(&self, fallback_secs: i64) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.expires_in.unwrap_or(fallback_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_expiry_fallback() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token": "t", "expires_in": 7200}"#).unwrap();
        let delta = resp.expires_at(3600) - Utc::now();
        assert!((7199..=7200).contains(&delta.num_seconds()));

        let resp: TokenResponse = serde_json::from_str(r#"{"access_token": "t"}"#).unwrap();
        let delta = resp.expires_at(3600) - Utc::now();
        assert!((3599..=3600).contains(&delta.num_seconds()));
        assert!(resp.refresh_token.is_none());
        assert!(resp.id_token.is_none());
    }
}
