//! Pod port-forward tunnels
//!
//! Opens a local listener and forwards every accepted connection into a pod
//! over the API server's port-forward subresource (an HTTP upgrade to a
//! multiplexed stream), using the kube crate's websocket support.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::{api::Api, Client};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

use super::discovery::ForwardablePair;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("port-forward for pod {pod} on port {port} did not become ready within {timeout:?}")]
    ReadyTimeout {
        pod: String,
        port: u16,
        timeout: Duration,
    },

    #[error("upgraded connection carried no stream for port {0}")]
    MissingStream(u16),

    #[error("transport failed: {0}")]
    Transport(String),
}

/// A live local-to-remote port mapping into one pod.
///
/// Owns its local port for the session lifetime; dropping the session (or
/// calling [`stop`](Self::stop)) terminates the accept loop and releases
/// the port.
#[derive(Debug)]
pub struct TunnelSession {
    local_port: u16,
    remote_port: u16,
    pod_name: String,
    namespace: String,
    stop: watch::Sender<bool>,
}

impl TunnelSession {
    /// Open a tunnel for a forwardable pair.
    ///
    /// Binds an ephemeral local port, spawns the transport task and blocks
    /// until the task signals readiness or `ready_timeout` elapses. On
    /// timeout the stop signal is triggered and no session survives.
    pub async fn open(
        client: &Client,
        pair: &ForwardablePair,
        ready_timeout: Duration,
    ) -> Result<Self, TunnelError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let local_port = listener.local_addr()?.port();

        let pods: Api<Pod> = Api::namespaced(client.clone(), &pair.pod.namespace);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(serve(
            pods,
            pair.pod.name.clone(),
            pair.target_port,
            listener,
            ready_tx,
            stop_rx,
        ));

        let session = Self {
            local_port,
            remote_port: pair.target_port,
            pod_name: pair.pod.name.clone(),
            namespace: pair.pod.namespace.clone(),
            stop: stop_tx,
        };

        match tokio::time::timeout(ready_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(
                    "tunnel ready: localhost:{local_port} -> {}/{} port {}",
                    session.namespace,
                    session.pod_name,
                    session.remote_port
                );
                Ok(session)
            }
            Ok(Ok(Err(e))) => {
                session.stop();
                Err(e)
            }
            Ok(Err(_)) => {
                session.stop();
                Err(TunnelError::Transport(
                    "transport task ended before signalling readiness".to_string(),
                ))
            }
            Err(_) => {
                session.stop();
                Err(TunnelError::ReadyTimeout {
                    pod: pair.pod.name.clone(),
                    port: pair.target_port,
                    timeout: ready_timeout,
                })
            }
        }
    }

    /// The leased local port
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The pod-side target port
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Name of the pod this session forwards into
    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    /// Namespace of the pod this session forwards into
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Trigger the stop signal. Idempotent; safe to call from any task.
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            tracing::debug!(
                "stopping tunnel localhost:{} -> {}/{}",
                self.local_port,
                self.namespace,
                self.pod_name
            );
        }
    }

    /// Whether the stop signal has fired
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    #[cfg(test)]
    pub(crate) fn detached(
        local_port: u16,
        remote_port: u16,
        pod_name: &str,
        namespace: &str,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            local_port,
            remote_port,
            pod_name: pod_name.to_string(),
            namespace: namespace.to_string(),
            stop,
        }
    }
}

/// Transport task: probes the port-forward subresource once to signal
/// readiness, then serves the accept loop until the stop signal fires.
async fn serve(
    pods: Api<Pod>,
    pod_name: String,
    port: u16,
    listener: TcpListener,
    ready_tx: oneshot::Sender<Result<(), TunnelError>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    // one upgrade round-trip proves the subresource is reachable
    let probe = pods
        .portforward(&pod_name, &[port])
        .await
        .map(drop)
        .map_err(TunnelError::from);
    let probe_ok = probe.is_ok();
    let _ = ready_tx.send(probe);
    if !probe_ok {
        return;
    }

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((conn, peer)) => {
                        tracing::debug!("accepted {peer} for {pod_name} port {port}");
                        let pods = pods.clone();
                        let pod_name = pod_name.clone();
                        let mut conn_stop = stop_rx.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                result = forward_connection(&pods, &pod_name, port, conn) => {
                                    if let Err(e) = result {
                                        tracing::warn!(
                                            "connection to {pod_name} port {port} failed: {e}"
                                        );
                                    }
                                }
                                _ = conn_stop.wait_for(|stopped| *stopped) => {
                                    tracing::debug!(
                                        "connection to {pod_name} port {port} closed by stop signal"
                                    );
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!("accept failed for {pod_name} port {port}: {e}");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("tunnel to {pod_name} port {port} closed");
}

/// Upgrades one connection worth of transport and copies bytes both ways
/// until either side closes.
async fn forward_connection(
    pods: &Api<Pod>,
    pod_name: &str,
    port: u16,
    mut local_conn: TcpStream,
) -> Result<(), TunnelError> {
    let mut forwarder = pods.portforward(pod_name, &[port]).await?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or(TunnelError::MissingStream(port))?;

    tokio::io::copy_bidirectional(&mut local_conn, &mut upstream).await?;

    drop(upstream);
    forwarder
        .join()
        .await
        .map_err(|e| TunnelError::Transport(e.to_string()))?;
    Ok(())
}
