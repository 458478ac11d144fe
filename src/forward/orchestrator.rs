//! Forward orchestration
//!
//! Runs one task per forwardable pair - open the tunnel, then resolve the
//! icon through it - and joins all attempts into a single result set. A
//! failing pair is dropped and logged; its siblings are unaffected.

use std::time::Duration;

use kube::Client;
use thiserror::Error;
use tokio::task::JoinSet;

use super::ForwardedEndpoint;
use crate::config::EngineConfig;
use crate::icon::{IconError, IconResolver};
use crate::kubernetes::discovery::ForwardablePair;
use crate::kubernetes::tunnel::{TunnelError, TunnelSession};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("tunnel to pod {pod} port {port} failed: {source}")]
    Tunnel {
        pod: String,
        port: u16,
        #[source]
        source: TunnelError,
    },

    #[error("icon resolution for pod {pod} via localhost:{local_port} failed: {source}")]
    Icon {
        pod: String,
        local_port: u16,
        #[source]
        source: IconError,
    },
}

/// Fan out tunnel + icon establishment for every pair and join the results.
///
/// The returned list contains exactly the pairs whose tunnel opened and
/// whose icon resolved (unless configured to keep icon-less endpoints), in
/// task completion order.
pub async fn build_endpoints(
    client: &Client,
    pairs: Vec<ForwardablePair>,
    resolver: &IconResolver,
    config: &EngineConfig,
) -> Vec<ForwardedEndpoint> {
    let ready_timeout = config.tunnel_ready_timeout();
    let keep_without_icon = config.keep_endpoint_without_icon;

    let mut tasks = JoinSet::new();
    for pair in pairs {
        let client = client.clone();
        let resolver = resolver.clone();
        tasks.spawn(async move {
            establish(client, pair, resolver, ready_timeout, keep_without_icon).await
        });
    }

    let mut endpoints = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(endpoint)) => {
                tracing::info!(
                    "endpoint ready on localhost:{} for pod {}",
                    endpoint.endpoint().local_port,
                    endpoint.endpoint().pod_name
                );
                endpoints.push(endpoint);
            }
            Ok(Err(e)) => tracing::warn!("dropping pair: {e}"),
            Err(e) => tracing::warn!("forward task failed to join: {e}"),
        }
    }

    endpoints
}

/// Establish one pair: tunnel first, icon second. Any partially opened
/// session is stopped before the error propagates.
async fn establish(
    client: Client,
    pair: ForwardablePair,
    resolver: IconResolver,
    ready_timeout: Duration,
    keep_without_icon: bool,
) -> Result<ForwardedEndpoint, ForwardError> {
    let session = TunnelSession::open(&client, &pair, ready_timeout)
        .await
        .map_err(|source| ForwardError::Tunnel {
            pod: pair.pod.name.clone(),
            port: pair.target_port,
            source,
        })?;

    let base_url = format!("http://localhost:{}", session.local_port());
    match resolver.resolve(&base_url).await {
        Ok(page) => Ok(ForwardedEndpoint::new(session, Some(page.icon), page.title)),
        Err(source) if keep_without_icon => {
            tracing::warn!(
                "keeping icon-less endpoint for pod {}: {source}",
                pair.pod.name
            );
            Ok(ForwardedEndpoint::new(session, None, String::new()))
        }
        Err(source) => {
            let local_port = session.local_port();
            session.stop();
            Err(ForwardError::Icon {
                pod: pair.pod.name.clone(),
                local_port,
                source,
            })
        }
    }
}
