//! OpenAI Codex provider: browser-redirect PKCE against auth.openai.com.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::callback::{self, CallbackListener};
use super::{OAuthProvider, TokenResponse, pkce};
use crate::interaction::InteractionPort;
use crate::record::CredentialRecord;
use crate::registry::{FlowKind, ProviderDescriptor};
use crate::{Error, Result};

const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const CALLBACK_PORT: u16 = 1455;
const CALLBACK_PATH: &str = "/auth/callback";
const SCOPES: &str = "openid profile email offline_access";
const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Endpoint set, overridable for tests.
#[derive(Clone, Debug)]
pub struct CodexEndpoints {
    pub auth_url: String,
    pub token_url: String,
}

impl Default for CodexEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://auth.openai.com/oauth/authorize".into(),
            token_url: "https://auth.openai.com/oauth/token".into(),
        }
    }
}

pub struct OpenaiCodexProvider {
    descriptor: ProviderDescriptor,
    endpoints: CodexEndpoints,
    http: reqwest::Client,
}

impl Default for OpenaiCodexProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenaiCodexProvider {
    pub fn new() -> Self {
        Self::with_endpoints(CodexEndpoints::default())
    }

    pub fn with_endpoints(endpoints: CodexEndpoints) -> Self {
        Self {
            descriptor: ProviderDescriptor::new(
                "openai-codex",
                "OpenAI Codex",
                FlowKind::BrowserRedirect,
                true,
                "OPENAI_API_KEY",
            ),
            endpoints,
            http: reqwest::Client::new(),
        }
    }

    fn authorize_url(
        &self,
        redirect_uri: &str,
        pkce: &pkce::PkceChallenge,
        state: &str,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.endpoints.auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", CLIENT_ID)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state)
            .append_pair("id_token_add_organizations", "true")
            .append_pair("codex_cli_simplified_flow", "true");
        Ok(url)
    }
}

/// ChatGPT account id from the id token's JWT claims.
fn extract_account_id(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims
        .get("https://api.openai.com/auth")?
        .get("chatgpt_account_id")?
        .as_str()
        .map(str::to_string)
}

fn extract_email(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("email")?.as_str().map(str::to_string)
}

#[async_trait]
impl OAuthProvider for OpenaiCodexProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn login(
        &self,
        port: &dyn InteractionPort,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord> {
        let listener = CallbackListener::bind(CALLBACK_PORT, CALLBACK_PATH).await?;
        let redirect_uri = listener.redirect_uri();

        let pkce = pkce::PkceChallenge::generate();
        let state = pkce::generate_state();
        let url = self.authorize_url(&redirect_uri, &pkce, &state)?;

        port.on_auth(url.as_str(), Some("Complete the sign-in in your browser."))
            .await;

        let (code, returned_state) = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::LoginAborted),
            received = listener.wait_for_code() => received?,
            pasted = port.on_manual_code() => callback::parse_redirect_url(&pasted?)?,
        };
        drop(listener);

        if returned_state != state {
            return Err(Error::StateMismatch);
        }

        port.on_progress("Exchanging authorization code").await;
        let response: TokenResponse = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("client_id", CLIENT_ID),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let account_id = response
            .id_token
            .as_deref()
            .and_then(extract_account_id)
            .or_else(|| extract_account_id(&response.access_token));
        let email = response.id_token.as_deref().and_then(extract_email);

        debug!("openai-codex login complete");
        Ok(CredentialRecord::new(
            response.access_token.clone(),
            response.refresh_token.clone(),
            response.expires_at(DEFAULT_EXPIRY_SECS),
        )
        .with_email(email)
        .with_account_id(account_id))
    }

    async fn refresh(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = record
            .refresh_token()
            .ok_or_else(|| Error::MissingRefreshToken {
                provider: "openai-codex".into(),
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

        // Rotating refresh tokens: adopt the replacement when issued.
        let refresh = response
            .refresh_token
            .clone()
            .or_else(|| record.refresh_token().map(str::to_string));

        Ok(CredentialRecord::new(
            response.access_token.clone(),
            refresh,
            response.expires_at(DEFAULT_EXPIRY_SECS),
        )
        .with_email(record.email.clone())
        .with_account_id(record.account_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fake_jwt(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_extract_account_id() {
        let token = fake_jwt(json!({
            "email": "dev@example.com",
            "https://api.openai.com/auth": { "chatgpt_account_id": "acct-123" },
        }));
        assert_eq!(extract_account_id(&token).as_deref(), Some("acct-123"));
        assert_eq!(extract_email(&token).as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn test_extract_account_id_tolerates_garbage() {
        assert!(extract_account_id("not-a-jwt").is_none());
        assert!(extract_account_id("a.%%%.c").is_none());
        let no_claim = fake_jwt(json!({"email": "x@example.com"}));
        assert!(extract_account_id(&no_claim).is_none());
    }

    #[test]
    fn test_authorize_url_simplified_flow_params() {
        let provider = OpenaiCodexProvider::new();
        let pkce = pkce::PkceChallenge::generate();
        let url = provider
            .authorize_url("http://localhost:1455/auth/callback", &pkce, "s")
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("codex_cli_simplified_flow=true"));
        assert!(query.contains("id_token_add_organizations=true"));
    }
}
