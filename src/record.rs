//! Credential record types.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// A stored OAuth credential for one provider.
///
/// Tokens are wrapped in [`SecretString`] so `Debug` output is redacted and
/// the underlying memory is zeroized on drop. Serialization into the settings
/// file goes through explicit helpers because `secrecy` deliberately does not
/// implement `Serialize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Access token presented to the consumer.
    #[serde(serialize_with = "serialize_secret")]
    pub access: SecretString,
    /// Refresh token, absent for flows that cannot refresh.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_option_secret"
    )]
    pub refresh: Option<SecretString>,
    /// Expiration timestamp. Mandatory: a record without one is never stored.
    pub expires: DateTime<Utc>,
    /// Account email, when the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Cloud project id, for providers whose API calls need one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Provider-side account id, when one is embedded in the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Enterprise endpoint override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_url: Option<String>,
}

impl CredentialRecord {
    pub fn new(
        access: impl Into<String>,
        refresh: Option<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            access: SecretString::from(access.into()),
            refresh: refresh.map(SecretString::from),
            expires,
            email: None,
            project_id: None,
            account_id: None,
            enterprise_url: None,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_project_id(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_account_id(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn with_enterprise_url(mut self, enterprise_url: Option<String>) -> Self {
        self.enterprise_url = enterprise_url;
        self
    }

    /// Access token as a plain string slice.
    pub fn access(&self) -> &str {
        self.access.expose_secret()
    }

    /// Refresh token as a plain string slice, if present.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh.as_ref().map(ExposeSecret::expose_secret)
    }

    pub fn has_refresh(&self) -> bool {
        self.refresh.is_some()
    }

    /// Check if the token is past its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires
    }

    /// Check if the token expires within the given look-ahead window.
    pub fn expires_within(&self, window: Duration) -> bool {
        Utc::now() + window >= self.expires
    }
}

pub(crate) fn serialize_secret<S>(
    secret: &SecretString,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

pub(crate) fn serialize_option_secret<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(value) => serializer.serialize_some(value.expose_secret()),
        None => serializer.serialize_none(),
    }
}
