//! Anthropic provider: authorization code + PKCE, finished by manual paste.
//!
//! The public Claude OAuth client has no localhost redirect; the console
//! callback page shows a `code#state` string the user pastes back.

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{OAuthProvider, TokenResponse, pkce};
use crate::interaction::InteractionPort;
use crate::record::CredentialRecord;
use crate::registry::{FlowKind, ProviderDescriptor};
use crate::{Error, Result};

const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
const SCOPES: &str = "org:create_api_key user:profile user:inference";
const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Endpoint set, overridable for tests.
#[derive(Clone, Debug)]
pub struct AnthropicEndpoints {
    pub auth_url: String,
    pub token_url: String,
}

impl Default for AnthropicEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://claude.ai/oauth/authorize".into(),
            token_url: "https://console.anthropic.com/v1/oauth/token".into(),
        }
    }
}

pub struct AnthropicProvider {
    descriptor: ProviderDescriptor,
    endpoints: AnthropicEndpoints,
    http: reqwest::Client,
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self::with_endpoints(AnthropicEndpoints::default())
    }

    pub fn with_endpoints(endpoints: AnthropicEndpoints) -> Self {
        Self {
            descriptor: ProviderDescriptor::new(
                "anthropic",
                "Anthropic",
                FlowKind::ManualPaste,
                false,
                "ANTHROPIC_API_KEY",
            ),
            endpoints,
            http: reqwest::Client::new(),
        }
    }

    fn authorize_url(&self, pkce: &pkce::PkceChallenge, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoints.auth_url)?;
        url.query_pairs_mut()
            .append_pair("code", "true")
            .append_pair("client_id", CLIENT_ID)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", REDIRECT_URI)
            .append_pair("scope", SCOPES)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state);
        Ok(url)
    }
}

#[async_trait]
impl OAuthProvider for AnthropicProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn login(
        &self,
        port: &dyn InteractionPort,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord> {
        let pkce = pkce::PkceChallenge::generate();
        let state = pkce::generate_state();
        let url = self.authorize_url(&pkce, &state)?;

        port.on_auth(
            url.as_str(),
            Some("Authorize in the browser, then paste the code shown on the callback page."),
        )
        .await;

        let pasted = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::LoginAborted),
            input = port.on_prompt(
                "Paste the authorization code",
                Some("code#state"),
                false,
            ) => input?,
        };

        let (code, returned_state) = pasted
            .trim()
            .split_once('#')
            .ok_or_else(|| Error::login_failed("anthropic", "expected code#state"))?;
        if returned_state != state {
            return Err(Error::StateMismatch);
        }

        port.on_progress("Exchanging authorization code").await;
        let response: TokenResponse = self
            .http
            .post(&self.endpoints.token_url)
            .json(&json!({
                "grant_type": "authorization_code",
                "code": code,
                "state": returned_state,
                "client_id": CLIENT_ID,
                "redirect_uri": REDIRECT_URI,
                "code_verifier": pkce.verifier,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("anthropic login complete");
        Ok(CredentialRecord::new(
            response.access_token.clone(),
            response.refresh_token.clone(),
            response.expires_at(DEFAULT_EXPIRY_SECS),
        ))
    }

    async fn refresh(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = record
            .refresh_token()
            .ok_or_else(|| Error::MissingRefreshToken {
                provider: "anthropic".into(),
            })?;

        let response: TokenResponse = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The grant rotates the refresh token; keep the old one only when no
        // replacement was issued.
        let refresh = response
            .refresh_token
            .clone()
            .or_else(|| record.refresh_token().map(str::to_string));

        Ok(
            CredentialRecord::new(
                response.access_token.clone(),
                refresh,
                response.expires_at(DEFAULT_EXPIRY_SECS),
            )
            .with_email(record.email.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_authorize_url_parameters() {
        let provider = AnthropicProvider::new();
        let pkce = pkce::PkceChallenge::generate();
        let url = provider.authorize_url(&pkce, "state-1").unwrap();

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], CLIENT_ID);
        assert_eq!(params["code"], "true");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["state"], "state-1");
        assert_eq!(params["redirect_uri"], REDIRECT_URI);
    }

    #[test]
    fn test_descriptor() {
        let provider = AnthropicProvider::new();
        assert_eq!(provider.descriptor().id, "anthropic");
        assert_eq!(provider.descriptor().flow, FlowKind::ManualPaste);
    }
}
