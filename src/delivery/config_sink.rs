//! Strategy A: rewrite the consumer's config file and restart it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DeliverySnapshot, DeliveryStrategy};
use crate::{Error, Result};

/// How the consumer process gets bounced after a config rewrite.
#[async_trait]
pub trait RestartHook: Send + Sync {
    async fn restart(&self) -> Result<()>;
}

/// Runs a shell command ("docker compose restart consumer", "systemctl ...").
pub struct CommandRestart {
    command: String,
}

impl CommandRestart {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl RestartHook for CommandRestart {
    async fn restart(&self) -> Result<()> {
        debug!(command = %self.command, "running restart command");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Settings(format!(
                "restart command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// For deployments where the consumer watches its config file itself.
pub struct NoopRestart;

#[async_trait]
impl RestartHook for NoopRestart {
    async fn restart(&self) -> Result<()> {
        Ok(())
    }
}

/// Rewrites a `KEY=VALUE` config file with the active credential and the
/// consumer bindings, then fires the restart hook.
///
/// Rendering is deterministic (keys sorted, trailing newline) so repeated
/// syncs of the same snapshot produce byte-identical files and file watchers
/// do not fire spuriously.
pub struct ConfigFileSink {
    path: PathBuf,
    restart: Arc<dyn RestartHook>,
}

impl ConfigFileSink {
    pub fn new(path: impl Into<PathBuf>, restart: Arc<dyn RestartHook>) -> Self {
        Self {
            path: path.into(),
            restart,
        }
    }

    fn render(snapshot: &DeliverySnapshot) -> String {
        let mut entries = BTreeMap::new();

        if let Some(active) = &snapshot.active {
            entries.insert(active.env_key.clone(), active.token.clone());
            entries.insert("AUTH_PROVIDER".to_string(), active.provider_id.clone());
            if let Some(project_id) = &active.project_id {
                entries.insert("GOOGLE_CLOUD_PROJECT".to_string(), project_id.clone());
            }
        }
        if let Some(model) = &snapshot.consumer.llm_model {
            entries.insert("LLM_MODEL".to_string(), model.clone());
        }
        if let Some(model) = &snapshot.consumer.embedding_model {
            entries.insert("EMBEDDING_MODEL".to_string(), model.clone());
        }
        for (key, value) in &snapshot.consumer.extra {
            entries.insert(key.clone(), value.clone());
        }

        let mut out = String::new();
        for (key, value) in entries {
            out.push_str(&key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl DeliveryStrategy for ConfigFileSink {
    fn name(&self) -> &'static str {
        "config-file"
    }

    async fn sync(&self, snapshot: &DeliverySnapshot) -> Result<()> {
        let rendered = Self::render(snapshot);

        // Skip the rewrite and restart when nothing changed.
        if let Ok(existing) = tokio::fs::read_to_string(&self.path).await {
            if existing == rendered {
                debug!(path = %self.path.display(), "config unchanged, skipping restart");
                return Ok(());
            }
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, &rendered).await?;
        info!(
            path = %self.path.display(),
            active = snapshot.active.as_ref().map(|a| a.provider_id.as_str()),
            "consumer config rewritten"
        );

        if let Err(e) = self.restart.restart().await {
            warn!(error = %e, "consumer restart failed");
            return Err(e);
        }
        Ok(())
    }
}
