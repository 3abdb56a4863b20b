//! Google providers (Antigravity and Gemini CLI): browser-redirect PKCE
//! against the Google installed-app OAuth client.
//!
//! Both variants share the flow and differ only in their fixed callback port
//! and provider id. The delivered api key is a JSON envelope carrying the
//! access token and the discovered Cloud Code project id, because the
//! consumer needs both to call the Cloud Code API.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::callback::{self, CallbackListener};
use super::{OAuthProvider, TokenResponse, pkce};
use crate::interaction::InteractionPort;
use crate::record::CredentialRecord;
use crate::registry::{FlowKind, ProviderDescriptor};
use crate::{Error, Result};

const CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
// Installed-app clients carry a non-confidential "secret" by design.
const CLIENT_SECRET: &str = "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";
const SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
    https://www.googleapis.com/auth/userinfo.email \
    https://www.googleapis.com/auth/userinfo.profile";
const CALLBACK_PATH: &str = "/oauth2callback";
const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Which Google-backed product this provider signs into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoogleVariant {
    Antigravity,
    GeminiCli,
}

impl GoogleVariant {
    /// Callback port registered with the OAuth client for this variant.
    pub fn callback_port(self) -> u16 {
        match self {
            GoogleVariant::Antigravity => 51121,
            GoogleVariant::GeminiCli => 8085,
        }
    }

    fn id(self) -> &'static str {
        match self {
            GoogleVariant::Antigravity => "google-antigravity",
            GoogleVariant::GeminiCli => "google-gemini-cli",
        }
    }

    fn name(self) -> &'static str {
        match self {
            GoogleVariant::Antigravity => "Google Antigravity",
            GoogleVariant::GeminiCli => "Google Gemini CLI",
        }
    }
}

/// Endpoint set, overridable for tests.
#[derive(Clone, Debug)]
pub struct GoogleEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub cloudcode_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
            cloudcode_url: "https://cloudcode-pa.googleapis.com".into(),
        }
    }
}

pub struct GoogleProvider {
    variant: GoogleVariant,
    descriptor: ProviderDescriptor,
    endpoints: GoogleEndpoints,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(variant: GoogleVariant) -> Self {
        Self::with_endpoints(variant, GoogleEndpoints::default())
    }

    pub fn with_endpoints(variant: GoogleVariant, endpoints: GoogleEndpoints) -> Self {
        Self {
            variant,
            descriptor: ProviderDescriptor::new(
                variant.id(),
                variant.name(),
                FlowKind::BrowserRedirect,
                true,
                "GEMINI_API_KEY",
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
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    /// Account email from the userinfo endpoint. Best effort: a failure here
    /// never fails the login.
    async fn fetch_email(&self, access_token: &str) -> Option<String> {
        let result: Result<Value> = async {
            Ok(self
                .http
                .get(&self.endpoints.userinfo_url)
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?)
        }
        .await;

        match result {
            Ok(body) => body.get("email").and_then(Value::as_str).map(str::to_string),
            Err(e) => {
                debug!(provider = self.descriptor.id, error = %e, "userinfo lookup failed");
                None
            }
        }
    }

    /// Cloud Code project id via `loadCodeAssist`. Best effort.
    async fn discover_project(&self, access_token: &str) -> Option<String> {
        let result: Result<Value> = async {
            Ok(self
                .http
                .post(format!(
                    "{}/v1internal:loadCodeAssist",
                    self.endpoints.cloudcode_url
                ))
                .bearer_auth(access_token)
                .json(&json!({
                    "metadata": {
                        "ideType": "IDE_UNSPECIFIED",
                        "platform": "PLATFORM_UNSPECIFIED",
                        "pluginType": "GEMINI",
                    }
                }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?)
        }
        .await;

        match result {
            Ok(body) => body
                .get("cloudaicompanionProject")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                debug!(provider = self.descriptor.id, error = %e, "project discovery failed");
                None
            }
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn login(
        &self,
        port: &dyn InteractionPort,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord> {
        // Bind before opening the browser so a port conflict fails fast.
        let listener =
            CallbackListener::bind(self.variant.callback_port(), CALLBACK_PATH).await?;
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
                ("code", code.as_str()),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        port.on_progress("Looking up account details").await;
        let email = self.fetch_email(&response.access_token).await;
        let project_id = self.discover_project(&response.access_token).await;

        debug!(provider = self.descriptor.id, "google login complete");
        Ok(CredentialRecord::new(
            response.access_token.clone(),
            response.refresh_token.clone(),
            response.expires_at(DEFAULT_EXPIRY_SECS),
        )
        .with_email(email)
        .with_project_id(project_id))
    }

    async fn refresh(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = record
            .refresh_token()
            .ok_or_else(|| Error::MissingRefreshToken {
                provider: self.descriptor.id.clone(),
            })?;

        let response: TokenResponse = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Google does not rotate the refresh token on this grant.
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
        .with_project_id(record.project_id.clone()))
    }

    /// JSON envelope so the consumer can split token and project id.
    fn api_key(&self, record: &CredentialRecord) -> String {
        let mut envelope = Map::new();
        envelope.insert("token".into(), Value::String(record.access().to_string()));
        if let Some(project_id) = &record.project_id {
            envelope.insert("projectId".into(), Value::String(project_id.clone()));
        }
        Value::Object(envelope).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn test_variant_ports_and_ids() {
        assert_eq!(GoogleVariant::Antigravity.callback_port(), 51121);
        assert_eq!(GoogleVariant::GeminiCli.callback_port(), 8085);
        assert_eq!(GoogleVariant::Antigravity.id(), "google-antigravity");
        assert_eq!(GoogleVariant::GeminiCli.id(), "google-gemini-cli");
    }

    #[test]
    fn test_authorize_url_requests_offline_access() {
        let provider = GoogleProvider::new(GoogleVariant::GeminiCli);
        let pkce = pkce::PkceChallenge::generate();
        let url = provider
            .authorize_url("http://localhost:8085/oauth2callback", &pkce, "s")
            .unwrap();

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(
            params["redirect_uri"],
            "http://localhost:8085/oauth2callback"
        );
    }

    #[test]
    fn test_api_key_is_json_envelope() {
        let provider = GoogleProvider::new(GoogleVariant::Antigravity);
        let record = CredentialRecord::new("ya29.token", None, Utc::now())
            .with_project_id(Some("proj-1".into()));

        let key: Value = serde_json::from_str(&provider.api_key(&record)).unwrap();
        assert_eq!(key["token"], "ya29.token");
        assert_eq!(key["projectId"], "proj-1");

        let bare = CredentialRecord::new("ya29.token", None, Utc::now());
        let key: Value = serde_json::from_str(&provider.api_key(&bare)).unwrap();
        assert!(key.get("projectId").is_none());
    }
}
