//! Session state
//!
//! Tracks which namespaces are active and the registry of endpoints
//! established for them. Re-activating a covered namespace returns the
//! cached endpoints instead of forwarding twice; deactivation only closes
//! tunnels no other active namespace still covers.

use crate::config::EngineConfig;
use crate::icon::IconResolver;
use crate::kubernetes::client::{KubeClient, KubeClientError};
use crate::kubernetes::discovery::{self, ALL_NAMESPACES};

use super::orchestrator;
use super::{Endpoint, ForwardedEndpoint};

/// Active namespaces plus the endpoint registry.
///
/// Mutation happens only through [`activate`](Self::activate),
/// [`deactivate`](Self::deactivate) and [`shutdown_all`](Self::shutdown_all),
/// and only after all per-pair tasks have joined; the caller is expected to
/// serialize overlapping calls.
#[derive(Default)]
pub struct SessionState {
    active_namespaces: Vec<String>,
    registry: Vec<ForwardedEndpoint>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces currently active, in activation order
    pub fn active_namespaces(&self) -> &[String] {
        &self.active_namespaces
    }

    /// Whether a query for `namespace` is already answered by the active
    /// set: either it is active itself or the all-namespaces sentinel is.
    pub fn is_covered(&self, namespace: &str) -> bool {
        self.active_namespaces
            .iter()
            .any(|n| n == namespace || n == ALL_NAMESPACES)
    }

    /// Ensure every forwardable pair in `namespace` has an endpoint and
    /// return the presentable views for that scope.
    ///
    /// Idempotent: a covered namespace is answered from the registry with
    /// no new discovery or tunnels. Otherwise pairs are discovered,
    /// forwarded concurrently and merged in; pairs that failed have been
    /// logged by the orchestrator.
    pub async fn activate(
        &mut self,
        client: &KubeClient,
        namespace: &str,
        resolver: &IconResolver,
        config: &EngineConfig,
    ) -> Result<Vec<Endpoint>, KubeClientError> {
        if self.is_covered(namespace) {
            tracing::info!(
                "skipping activation of {namespace}: already covered by {:?}",
                self.active_namespaces
            );
            return Ok(self.endpoints_in(namespace));
        }

        // pods of individually active namespaces are already forwarded
        let skip = if namespace == ALL_NAMESPACES {
            self.active_namespaces.clone()
        } else {
            Vec::new()
        };

        let pairs = discovery::discover(client, namespace, &skip).await?;
        tracing::info!("{} forwardable pairs discovered in {namespace}", pairs.len());

        let established =
            orchestrator::build_endpoints(client.inner(), pairs, resolver, config).await;
        tracing::info!("{} endpoints established in {namespace}", established.len());

        self.registry.extend(established);
        if !self.active_namespaces.iter().any(|n| n == namespace) {
            self.active_namespaces.push(namespace.to_string());
        }

        Ok(self.endpoints_in(namespace))
    }

    /// Stop and remove the endpoints the target namespace no longer covers
    /// and drop it from the active set.
    ///
    /// For the all-namespaces sentinel only endpoints not owned by another
    /// still-active individual namespace are closed.
    pub fn deactivate(&mut self, namespace: &str) {
        if namespace == ALL_NAMESPACES {
            let keep: Vec<String> = self
                .active_namespaces
                .iter()
                .filter(|n| *n != ALL_NAMESPACES)
                .cloned()
                .collect();
            self.registry.retain(|forwarded| {
                if keep.iter().any(|n| n == forwarded.namespace()) {
                    true
                } else {
                    forwarded.stop();
                    false
                }
            });
        } else {
            self.registry.retain(|forwarded| {
                if forwarded.namespace() == namespace {
                    forwarded.stop();
                    false
                } else {
                    true
                }
            });
        }

        self.active_namespaces.retain(|n| n != namespace);
        tracing::info!(
            "deactivated {namespace}; {} endpoints remain",
            self.registry.len()
        );
    }

    /// Stop every live tunnel unconditionally and clear the registry.
    /// Used on context switch and process teardown.
    pub fn shutdown_all(&mut self) {
        for forwarded in &self.registry {
            tracing::info!(
                "closing port forward on port {} of pod {}",
                forwarded.endpoint().pod_port,
                forwarded.endpoint().pod_name
            );
            forwarded.stop();
        }
        self.registry.clear();
        self.active_namespaces.clear();
    }

    /// Presentable endpoints for a scope: everything for the sentinel,
    /// otherwise the namespace's own entries.
    pub fn endpoints_in(&self, namespace: &str) -> Vec<Endpoint> {
        self.registry
            .iter()
            .filter(|f| namespace == ALL_NAMESPACES || f.namespace() == namespace)
            .map(|f| f.endpoint().clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(&mut self, forwarded: ForwardedEndpoint) {
        self.registry.push(forwarded);
    }
}
