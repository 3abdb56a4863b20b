//! Credential delivery strategies.
//!
//! The manager fans a [`DeliverySnapshot`] out to every registered strategy
//! whenever the active credential changes: login or refresh of the active
//! provider, logout, a forced clear, or an active-source switch.

mod config_sink;
mod headers;

pub use config_sink::{CommandRestart, ConfigFileSink, NoopRestart, RestartHook};
pub use headers::{HeaderDelivery, PROVIDER_HEADER, TOKEN_HEADER, auth_headers};

use async_trait::async_trait;

use crate::settings::ConsumerConfig;
use crate::Result;

/// The active credential, pre-shaped for delivery.
#[derive(Clone)]
pub struct ActiveCredential {
    pub provider_id: String,
    /// Consumer environment variable the key maps onto.
    pub env_key: String,
    /// Raw bearer token.
    pub token: String,
    /// Provider-shaped api key (may be a JSON envelope).
    pub api_key: String,
    pub project_id: Option<String>,
}

impl std::fmt::Debug for ActiveCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCredential")
            .field("provider_id", &self.provider_id)
            .field("env_key", &self.env_key)
            .field("token", &"[REDACTED]")
            .field("api_key", &"[REDACTED]")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// What a delivery strategy gets to work with. `active` is `None` when no
/// provider is designated or its credential was cleared; strategies must
/// deliver the absence too, so the consumer stops using a dead key.
#[derive(Clone, Debug, Default)]
pub struct DeliverySnapshot {
    pub active: Option<ActiveCredential>,
    pub consumer: ConsumerConfig,
}

/// One way of getting the active credential into the consumer.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sync(&self, snapshot: &DeliverySnapshot) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_delivered_tokens() {
        let snapshot = DeliverySnapshot {
            active: Some(ActiveCredential {
                provider_id: "anthropic".into(),
                env_key: "ANTHROPIC_API_KEY".into(),
                token: "sk-live-token".into(),
                api_key: "sk-live-token".into(),
                project_id: None,
            }),
            consumer: ConsumerConfig::default(),
        };
        let rendered = format!("{snapshot:?}");
        assert!(!rendered.contains("sk-live-token"));
        assert!(rendered.contains("anthropic"));
    }
}
