//! Engine facade
//!
//! The surface consumed by the presentation layer: namespace listing,
//! endpoint activation, namespace removal, context switching and teardown.
//! Every failure degrades to an empty or unchanged result plus a log line;
//! nothing here terminates the process.

use crate::config::EngineConfig;
use crate::forward::{Endpoint, SessionState};
use crate::icon::{IconError, IconResolver};
use crate::kubernetes::ContextManager;

/// Owns the cluster context, the session state and the icon resolver.
///
/// Methods take `&mut self`; the caller is expected to serialize calls (at
/// most one in-flight activate/deactivate per process).
pub struct PortholeApp {
    config: EngineConfig,
    contexts: ContextManager,
    state: SessionState,
    resolver: IconResolver,
}

impl PortholeApp {
    pub fn new(config: EngineConfig) -> Result<Self, IconError> {
        let resolver = IconResolver::new(config.http_timeout())?;
        Ok(Self {
            config,
            contexts: ContextManager::new(),
            state: SessionState::new(),
            resolver,
        })
    }

    /// Bootstrap from the default kubeconfig; tolerant of a missing file or
    /// an unreachable cluster.
    pub async fn connect_default(&mut self) {
        self.contexts.connect_default().await;
    }

    /// Names of the namespaces available in the current cluster. Empty when
    /// disconnected or on query failure.
    pub async fn list_namespaces(&self) -> Vec<String> {
        let Some(context) = self.contexts.current() else {
            tracing::warn!("no cluster context; returning no namespaces");
            return Vec::new();
        };
        match context.client().list_namespaces().await {
            Ok(namespaces) => {
                tracing::info!("found the following namespaces {namespaces:?}");
                namespaces
            }
            Err(e) => {
                tracing::warn!("failed to list namespaces: {e}");
                Vec::new()
            }
        }
    }

    /// Ensure the namespace's endpoints are forwarded and return their
    /// presentable views. Already active scopes are answered from the
    /// registry without new tunnels.
    pub async fn get_endpoints(&mut self, namespace: &str) -> Vec<Endpoint> {
        let Some(context) = self.contexts.current() else {
            tracing::warn!("no cluster context; cannot activate {namespace}");
            return Vec::new();
        };
        match self
            .state
            .activate(context.client(), namespace, &self.resolver, &self.config)
            .await
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!("failed to activate {namespace}: {e}");
                Vec::new()
            }
        }
    }

    /// JSON form of [`get_endpoints`](Self::get_endpoints)
    pub async fn get_endpoints_json(&mut self, namespace: &str) -> String {
        let endpoints = self.get_endpoints(namespace).await;
        serde_json::to_string(&endpoints).unwrap_or_else(|e| {
            tracing::warn!("failed to serialize endpoints: {e}");
            "[]".to_string()
        })
    }

    /// Stop forwarding the namespace and drop its endpoints
    pub fn remove_namespace(&mut self, namespace: &str) {
        self.state.deactivate(namespace);
    }

    /// Switch cluster context; returns the resulting (path, context) pair,
    /// unchanged on failure.
    pub async fn switch_context(&mut self, config_path: &str, context: &str) -> (String, String) {
        self.contexts
            .switch(&mut self.state, config_path, context)
            .await
    }

    pub fn current_config_path(&self) -> String {
        self.contexts.current_config_path()
    }

    pub fn available_contexts(&self) -> Vec<String> {
        self.contexts.available_contexts()
    }

    pub fn current_context(&self) -> String {
        self.contexts.current_context()
    }

    /// Stop every live tunnel; called once at process teardown
    pub fn shutdown_all(&mut self) {
        self.state.shutdown_all();
    }
}
