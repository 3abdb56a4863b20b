//! GitHub Copilot provider: device-code flow, then a short-lived Copilot
//! bearer minted from the long-lived GitHub token.
//!
//! There is no classic refresh-token grant here. The GitHub OAuth token from
//! the device flow is stored in the `refresh` slot and every refresh re-mints
//! a Copilot session token from it.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::device::{self, PollOutcome};
use super::OAuthProvider;
use crate::interaction::InteractionPort;
use crate::record::CredentialRecord;
use crate::registry::{FlowKind, ProviderDescriptor};
use crate::{Error, Result};

const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const SCOPE: &str = "read:user";

/// Endpoint set, overridable for tests.
#[derive(Clone, Debug)]
pub struct CopilotEndpoints {
    pub device_code_url: String,
    pub access_token_url: String,
    pub copilot_token_url: String,
}

impl Default for CopilotEndpoints {
    fn default() -> Self {
        Self {
            device_code_url: "https://github.com/login/device/code".into(),
            access_token_url: "https://github.com/login/oauth/access_token".into(),
            copilot_token_url: "https://api.github.com/copilot_internal/v2/token".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    900
}

#[derive(Debug, Deserialize)]
struct CopilotTokenResponse {
    token: String,
    expires_at: i64,
}

pub struct GithubCopilotProvider {
    descriptor: ProviderDescriptor,
    endpoints: CopilotEndpoints,
    http: reqwest::Client,
}

impl Default for GithubCopilotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubCopilotProvider {
    pub fn new() -> Self {
        Self::with_endpoints(CopilotEndpoints::default())
    }

    pub fn with_endpoints(endpoints: CopilotEndpoints) -> Self {
        Self {
            descriptor: ProviderDescriptor::new(
                "github-copilot",
                "GitHub Copilot",
                FlowKind::DeviceCode,
                false,
                "OPENAI_API_KEY",
            ),
            endpoints,
            http: reqwest::Client::new(),
        }
    }

    /// One poll of the device token endpoint. GitHub answers 200 with an
    /// `error` field while the grant is pending, so classification happens
    /// on the body, not the status.
    async fn poll_once(&self, device_code: &str) -> Result<PollOutcome<String>> {
        let body: Value = self
            .http
            .post(&self.endpoints.access_token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", CLIENT_ID),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(token) = body.get("access_token").and_then(Value::as_str) {
            return Ok(PollOutcome::Success(token.to_string()));
        }
        match body.get("error").and_then(Value::as_str) {
            Some("authorization_pending") => Ok(PollOutcome::Pending),
            Some("slow_down") => Ok(PollOutcome::SlowDown),
            Some("access_denied") => Ok(PollOutcome::Denied),
            Some("expired_token") => Ok(PollOutcome::Expired),
            other => Err(Error::login_failed(
                "github-copilot",
                format!("unexpected token response: {}", other.unwrap_or("no error code")),
            )),
        }
    }

    /// Mint a Copilot session token from the GitHub OAuth token.
    async fn mint_copilot_token(&self, github_token: &str) -> Result<CredentialRecord> {
        let response: CopilotTokenResponse = self
            .http
            .get(&self.endpoints.copilot_token_url)
            .header(reqwest::header::AUTHORIZATION, format!("token {github_token}"))
            .header(reqwest::header::ACCEPT, "application/json")
            .header("Editor-Version", "vscode/1.96.0")
            .header("Editor-Plugin-Version", "copilot/1.0")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let expires = DateTime::from_timestamp(response.expires_at, 0)
            .unwrap_or_else(|| Utc::now() + Duration::minutes(25));

        Ok(CredentialRecord::new(
            response.token,
            Some(github_token.to_string()),
            expires,
        ))
    }
}

#[async_trait]
impl OAuthProvider for GithubCopilotProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn login(
        &self,
        port: &dyn InteractionPort,
        cancel: &CancellationToken,
    ) -> Result<CredentialRecord> {
        port.on_progress("Requesting device code").await;
        let device: DeviceCodeResponse = self
            .http
            .post(&self.endpoints.device_code_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("client_id", CLIENT_ID), ("scope", SCOPE)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        port.on_auth(
            &device.verification_uri,
            Some(&format!("Enter code {}", device.user_code)),
        )
        .await;

        let github_token = device::poll(
            "github-copilot",
            StdDuration::from_secs(device.interval),
            StdDuration::from_secs(device.expires_in),
            cancel,
            || self.poll_once(&device.device_code),
        )
        .await?;

        port.on_progress("Minting Copilot session token").await;
        let record = self.mint_copilot_token(&github_token).await?;
        debug!("github-copilot login complete");
        Ok(record)
    }

    async fn refresh(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let github_token = record
            .refresh_token()
            .ok_or_else(|| Error::MissingRefreshToken {
                provider: "github-copilot".into(),
            })?;
        let minted = self.mint_copilot_token(github_token).await?;
        Ok(minted.with_enterprise_url(record.enterprise_url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_code_response_defaults() {
        let parsed: DeviceCodeResponse = serde_json::from_str(
            r#"{"device_code": "d", "user_code": "ABCD-1234", "verification_uri": "https://github.com/login/device"}"#,
        )
        .unwrap();
        assert_eq!(parsed.interval, 5);
        assert_eq!(parsed.expires_in, 900);
    }

    #[tokio::test]
    async fn test_refresh_without_github_token() {
        let provider = GithubCopilotProvider::new();
        let record = CredentialRecord::new("copilot-token", None, Utc::now());
        let err = provider.refresh(&record).await.unwrap_err();
        assert!(matches!(err, Error::MissingRefreshToken { .. }));
    }
}
