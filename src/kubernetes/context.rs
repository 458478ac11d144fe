//! Cluster context management
//!
//! Holds the active (kubeconfig path, context) pair and its API client, and
//! swaps it atomically: a new context is installed only after its client
//! builds, and installing it tears down every live tunnel first.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::client::{KubeClient, KubeClientError};
use super::config::{KubeConfig, KubeConfigError};
use crate::forward::SessionState;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Kubeconfig error: {0}")]
    Config(#[from] KubeConfigError),

    #[error("Client error: {0}")]
    Client(#[from] KubeClientError),

    #[error("kubeconfig {0} declares no contexts")]
    NoContexts(PathBuf),
}

/// Named cluster credentials plus the API client built from them
pub struct ClusterContext {
    config_path: PathBuf,
    context_name: String,
    kubeconfig: KubeConfig,
    client: KubeClient,
}

impl ClusterContext {
    /// Connect to a context of a kubeconfig file. When `context` is `None`
    /// the file's current context (or its first declared one) is used.
    pub async fn connect(path: &Path, context: Option<&str>) -> Result<Self, ContextError> {
        let kubeconfig = KubeConfig::load_from(path)?;
        let context_name = match context {
            Some(name) => name.to_string(),
            None => kubeconfig
                .preferred_context()
                .ok_or_else(|| ContextError::NoContexts(path.to_path_buf()))?,
        };
        let client = KubeClient::from_kubeconfig(path, &context_name).await?;

        Ok(Self {
            config_path: path.to_path_buf(),
            context_name,
            kubeconfig,
            client,
        })
    }

    /// Connect using the default kubeconfig location
    pub async fn connect_default() -> Result<Self, ContextError> {
        let path = KubeConfig::default_path()?;
        Self::connect(&path, None).await
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn client(&self) -> &KubeClient {
        &self.client
    }

    /// All context names declared by the active kubeconfig
    pub fn available_contexts(&self) -> Vec<String> {
        self.kubeconfig.context_names()
    }
}

/// Owns the current cluster context, if any, and the switch rules.
#[derive(Default)]
pub struct ContextManager {
    current: Option<ClusterContext>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bootstrap from the default kubeconfig. An unreachable cluster or a
    /// missing file is tolerated: the engine just starts without a context.
    pub async fn connect_default(&mut self) {
        match ClusterContext::connect_default().await {
            Ok(ctx) => {
                tracing::info!(
                    "connected to context {} from {:?}",
                    ctx.context_name(),
                    ctx.config_path()
                );
                self.current = Some(ctx);
            }
            Err(e) => {
                tracing::warn!("failed to connect default kubeconfig: {e}");
            }
        }
    }

    pub fn current(&self) -> Option<&ClusterContext> {
        self.current.as_ref()
    }

    /// Path of the active kubeconfig, empty when disconnected
    pub fn current_config_path(&self) -> String {
        self.current
            .as_ref()
            .map(|c| c.config_path().display().to_string())
            .unwrap_or_default()
    }

    /// Name of the active context, empty when disconnected
    pub fn current_context(&self) -> String {
        self.current
            .as_ref()
            .map(|c| c.context_name().to_string())
            .unwrap_or_default()
    }

    /// Context names declared by the active kubeconfig
    pub fn available_contexts(&self) -> Vec<String> {
        self.current
            .as_ref()
            .map(|c| c.available_contexts())
            .unwrap_or_default()
    }

    /// Switch to another kubeconfig path and/or context.
    ///
    /// Changing the path selects that file's preferred context; keeping the
    /// path switches to the named context. All live tunnels are shut down
    /// once the replacement client has built. On any failure the previous
    /// context and its sessions stay untouched and the previous pair is
    /// returned.
    pub async fn switch(
        &mut self,
        state: &mut SessionState,
        config_path: &str,
        context: &str,
    ) -> (String, String) {
        let previous = (self.current_config_path(), self.current_context());
        let path = PathBuf::from(config_path);

        let requested = if previous.0 != config_path {
            None
        } else if context == previous.1 {
            // nothing changed
            return previous;
        } else {
            Some(context)
        };

        match ClusterContext::connect(&path, requested).await {
            Ok(next) => {
                // close forwards established under the old context
                state.shutdown_all();
                let installed = (next.config_path().display().to_string(),
                    next.context_name().to_string());
                tracing::info!("switched to context {} at {}", installed.1, installed.0);
                self.current = Some(next);
                installed
            }
            Err(e) => {
                tracing::warn!("context switch to {config_path} failed: {e}");
                previous
            }
        }
    }
}
