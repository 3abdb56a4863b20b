//! Provider registry and descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::provider::{
    AnthropicProvider, GithubCopilotProvider, GoogleProvider, GoogleVariant, OAuthProvider,
    OpenaiCodexProvider,
};

/// Which login flow a provider runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Authorization code + PKCE, finished by a localhost redirect.
    BrowserRedirect,
    /// RFC 8628 device authorization grant.
    DeviceCode,
    /// Authorization code + PKCE, finished by pasting the code by hand.
    ManualPaste,
}

/// Static facts about a provider that the rest of the system keys off.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    /// Stable provider id ("anthropic", "github-copilot", ...).
    pub id: String,
    /// Human-readable name for status listings.
    pub name: String,
    pub flow: FlowKind,
    /// Whether login binds a localhost callback listener.
    pub uses_callback_listener: bool,
    /// Consumer environment variable this provider's key is delivered under.
    pub env_key: String,
}

impl ProviderDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        flow: FlowKind,
        uses_callback_listener: bool,
        env_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            flow,
            uses_callback_listener,
            env_key: env_key.into(),
        }
    }
}

/// Lookup table from provider id to implementation.
///
/// The registry is the only path from the manager, sweeper, and delivery
/// layers to provider behavior; none of them branch on provider ids.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five built-in providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GoogleProvider::new(GoogleVariant::Antigravity)));
        registry.register(Arc::new(GoogleProvider::new(GoogleVariant::GeminiCli)));
        registry.register(Arc::new(GithubCopilotProvider::new()));
        registry.register(Arc::new(AnthropicProvider::new()));
        registry.register(Arc::new(OpenaiCodexProvider::new()));
        registry
    }

    /// Register a provider, replacing any previous one with the same id.
    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers
            .insert(provider.descriptor().id.clone(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers.contains_key(provider_id)
    }

    /// Descriptors of all registered providers, sorted by id.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut all: Vec<_> = self
            .providers
            .values()
            .map(|p| p.descriptor().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_the_builtin_catalog() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.len(), 5);

        let ids: Vec<_> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "anthropic",
                "github-copilot",
                "google-antigravity",
                "google-gemini-cli",
                "openai-codex",
            ]
        );
    }

    #[test]
    fn test_descriptor_flow_and_env_mapping() {
        let registry = ProviderRegistry::with_defaults();

        let anthropic = registry.get("anthropic").unwrap();
        assert_eq!(anthropic.descriptor().flow, FlowKind::ManualPaste);
        assert_eq!(anthropic.descriptor().env_key, "ANTHROPIC_API_KEY");
        assert!(!anthropic.descriptor().uses_callback_listener);

        let copilot = registry.get("github-copilot").unwrap();
        assert_eq!(copilot.descriptor().flow, FlowKind::DeviceCode);
        assert_eq!(copilot.descriptor().env_key, "OPENAI_API_KEY");

        let gemini = registry.get("google-gemini-cli").unwrap();
        assert_eq!(gemini.descriptor().flow, FlowKind::BrowserRedirect);
        assert_eq!(gemini.descriptor().env_key, "GEMINI_API_KEY");
        assert!(gemini.descriptor().uses_callback_listener);
    }

    #[test]
    fn test_unknown_lookup_is_none() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.get("example-idp").is_none());
    }
}
