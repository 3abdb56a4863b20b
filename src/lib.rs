//! # credbridge
//!
//! OAuth credential lifecycle and delivery bridge for external LLM consumers.
//!
//! This crate signs users in against hosted identity providers (browser
//! redirect with PKCE, device code, or manual code paste), keeps the issued
//! tokens fresh in a persistent store, and delivers the active credential to
//! an external consumer service, either by rewriting its config file or by
//! attaching per-request headers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use credbridge::{CredentialManager, JsonFileSettings, NullInteraction};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), credbridge::Error> {
//!     let settings = Arc::new(JsonFileSettings::default_location()?);
//!     let manager = CredentialManager::builder()
//!         .settings(settings)
//!         .build()
//!         .await?;
//!
//!     let port = NullInteraction;
//!     manager
//!         .login("anthropic", &port, &CancellationToken::new())
//!         .await?;
//!     if let Some(key) = manager.get_api_key("anthropic").await? {
//!         println!("key ready ({} chars)", key.len());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod consumer;
pub mod delivery;
pub mod interaction;
pub mod manager;
pub mod provider;
pub mod record;
pub mod registry;
pub mod settings;
pub mod store;
pub mod sweeper;

mod refresh;

// Re-exports for convenience
pub use consumer::ConsumerClient;
pub use delivery::{
    ActiveCredential, CommandRestart, ConfigFileSink, DeliverySnapshot, DeliveryStrategy,
    HeaderDelivery, NoopRestart, RestartHook,
};
pub use interaction::{InteractionPort, NullInteraction};
pub use manager::{CredentialManager, CredentialManagerBuilder, ProviderStatus};
pub use provider::{
    AnthropicProvider, CallbackListener, GithubCopilotProvider, GoogleProvider, GoogleVariant,
    OAuthProvider, OpenaiCodexProvider, PkceChallenge,
};
pub use record::CredentialRecord;
pub use registry::{FlowKind, ProviderDescriptor, ProviderRegistry};
pub use settings::{ConsumerConfig, JsonFileSettings, MemorySettings, SettingsState, SettingsStore};
pub use store::CredentialStore;
pub use sweeper::{DEFAULT_SWEEP_PERIOD, spawn_sweeper};

/// Error type for credbridge operations.
///
/// All errors include actionable context to help diagnose and resolve issues.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Provider id is not registered.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Login flow was cancelled before completing.
    #[error("Login aborted")]
    LoginAborted,

    /// Login flow failed.
    #[error("Login failed for {provider}: {message}")]
    LoginFailed { provider: String, message: String },

    /// Anti-CSRF state returned by the provider did not match ours.
    #[error("OAuth state mismatch, possible CSRF or stale redirect")]
    StateMismatch,

    /// Stored record has no refresh token, re-login is required.
    #[error("No refresh token stored for {provider}, login again")]
    MissingRefreshToken { provider: String },

    /// Token refresh against the provider failed.
    #[error("Token refresh failed for {provider}: {message}")]
    RefreshFailed { provider: String, message: String },

    /// Credential is gone (expired and unrefreshable), user must re-login.
    #[error("Credential for {provider} expired, login again")]
    TokenExpiredNeedsLogin { provider: String },

    /// Consumer rejected our credential even after a forced refresh.
    #[error("Consumer rejected credential (HTTP {status}), login again")]
    AuthRejectedByConsumer { status: u16 },

    /// Consumer returned a non-auth error response.
    #[error("Consumer error (HTTP {status}): {message}")]
    Consumer { status: u16, message: String },

    /// Localhost callback listener failed.
    #[error("Callback listener error: {0}")]
    Callback(String),

    /// Settings persistence failed.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Interactive input was required but not available.
    #[error("Interaction error: {0}")]
    Interaction(String),

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// URL construction failed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn login_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::LoginFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn refresh_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RefreshFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// True when the operation was cancelled by the caller.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::LoginAborted)
    }

    /// True when the only way forward is an interactive re-login.
    pub fn needs_login(&self) -> bool {
        matches!(
            self,
            Error::TokenExpiredNeedsLogin { .. }
                | Error::MissingRefreshToken { .. }
                | Error::AuthRejectedByConsumer { .. }
        )
    }

    /// True when the consumer refused the credential (401/403 after retry).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Error::AuthRejectedByConsumer { .. })
    }

    /// True for failures that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Consumer { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Result type for credbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
