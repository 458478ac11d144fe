//! Kubernetes API client
//!
//! Wraps the kube crate to provide namespace, pod and service listing for a
//! (kubeconfig path, context) pair.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use thiserror::Error;
use tokio::sync::RwLock;

/// Global client cache - avoids recreating clients (expensive TLS handshake)
/// every time a namespace is activated in the same context
static CLIENT_CACHE: OnceLock<RwLock<HashMap<String, Client>>> = OnceLock::new();

fn client_cache() -> &'static RwLock<HashMap<String, Client>> {
    CLIENT_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

#[derive(Debug, Error)]
pub enum KubeClientError {
    #[error("Failed to create client: {0}")]
    ClientError(#[from] kube::Error),
    #[error("Failed to load kubeconfig: {0}")]
    ConfigError(#[from] kube::config::KubeconfigError),
}

/// Kubernetes API client bound to one kubeconfig context
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Build a client for a specific context of a kubeconfig file (cached)
    pub async fn from_kubeconfig(path: &Path, context_name: &str) -> Result<Self, KubeClientError> {
        let cache = client_cache();
        let cache_key = format!("{}::{}", path.display(), context_name);

        {
            let read_guard = cache.read().await;
            if let Some(client) = read_guard.get(&cache_key) {
                tracing::debug!("client cache HIT for {}", cache_key);
                return Ok(Self {
                    client: client.clone(),
                });
            }
        }

        tracing::info!("client cache MISS for {} - creating new client", cache_key);
        let start = std::time::Instant::now();

        let kubeconfig = Kubeconfig::read_from(path)?;
        let options = KubeConfigOptions {
            context: Some(context_name.to_string()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
        let client = Client::try_from(config)?;

        {
            let mut write_guard = cache.write().await;
            write_guard.insert(cache_key.clone(), client.clone());
        }

        tracing::info!("client for {} created in {:?}", cache_key, start.elapsed());

        Ok(Self { client })
    }

    /// Get the raw kube client for port-forward operations
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// List the names of all namespaces in the cluster
    pub async fn list_namespaces(&self) -> Result<Vec<String>, KubeClientError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    /// List pods in a namespace, or cluster-wide when `namespace` is `None`
    pub async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>, KubeClientError> {
        let pods: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(pods.list(&ListParams::default()).await?.items)
    }

    /// List services in a namespace, or cluster-wide when `namespace` is `None`
    pub async fn list_services(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Service>, KubeClientError> {
        let services: Api<Service> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(services.list(&ListParams::default()).await?.items)
    }
}
