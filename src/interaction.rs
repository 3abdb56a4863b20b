//! User interaction surface for login flows.

use async_trait::async_trait;

use crate::{Error, Result};

/// Callbacks a login flow uses to talk to the human driving it.
///
/// Hosts implement this once (TUI, web UI, test harness) and every provider
/// flow reports through it: the authorization URL to open, progress notes,
/// and prompts for flows that need pasted input.
#[async_trait]
pub trait InteractionPort: Send + Sync {
    /// An authorization URL is ready for the user to open.
    async fn on_auth(&self, url: &str, instructions: Option<&str>);

    /// Ask the user for a line of input.
    async fn on_prompt(
        &self,
        message: &str,
        placeholder: Option<&str>,
        allow_empty: bool,
    ) -> Result<String>;

    /// A progress note worth surfacing ("Exchanging authorization code").
    async fn on_progress(&self, message: &str);

    /// Manual fallback for browser-redirect flows: the full redirect URL the
    /// user landed on, pasted by hand when the local listener cannot be
    /// reached. The default never resolves, which leaves the listener as the
    /// only completion path.
    async fn on_manual_code(&self) -> Result<String> {
        std::future::pending().await
    }
}

/// Interaction port that discards output and refuses prompts.
///
/// Useful for headless refresh-only deployments and tests that must not hit
/// an interactive step.
pub struct NullInteraction;

#[async_trait]
impl InteractionPort for NullInteraction {
    async fn on_auth(&self, url: &str, _instructions: Option<&str>) {
        tracing::info!(url, "authorization URL ready");
    }

    async fn on_prompt(
        &self,
        message: &str,
        _placeholder: Option<&str>,
        _allow_empty: bool,
    ) -> Result<String> {
        Err(Error::Interaction(format!(
            "no interactive input available for prompt: {message}"
        )))
    }

    async fn on_progress(&self, message: &str) {
        tracing::debug!(message, "login progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_interaction_refuses_prompts() {
        let err = NullInteraction
            .on_prompt("Paste the authorization code", None, false)
            .await
            .unwrap_err();
        // Provider-agnostic: the calling provider wraps it with its own id.
        assert!(matches!(err, Error::Interaction(_)));
        assert!(!err.to_string().contains("unknown"));
    }
}
