//! Forwarding engine
//!
//! Fans tunnel + icon work out over discovered pairs and tracks the
//! resulting endpoints per activated namespace.

pub mod orchestrator;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::icon::Icon;
use crate::kubernetes::TunnelSession;

pub use orchestrator::{build_endpoints, ForwardError};
pub use state::SessionState;

/// The externally presentable record for one forwarded endpoint.
///
/// This is the wire contract handed to the presentation layer; internal
/// representation can change without touching these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub local_port: u16,
    pub pod_port: u16,
    pub title: String,
    pub icon_url: String,
    pub icon_remote_url: String,
    pub namespace: String,
    pub pod_name: String,
}

/// A live tunnel together with its presentable view
#[derive(Debug)]
pub struct ForwardedEndpoint {
    session: TunnelSession,
    endpoint: Endpoint,
}

impl ForwardedEndpoint {
    /// Combine an established session with its resolved page data. An empty
    /// title falls back to the pod name; a missing icon leaves the icon URLs
    /// empty.
    pub fn new(session: TunnelSession, icon: Option<Icon>, title: String) -> Self {
        let title = if title.is_empty() {
            session.pod_name().to_string()
        } else {
            title
        };
        let (icon_url, icon_remote_url) = match icon {
            Some(icon) => (
                format!("file://{}", icon.file_path.display()),
                icon.remote_url,
            ),
            None => (String::new(), String::new()),
        };

        let endpoint = Endpoint {
            local_port: session.local_port(),
            pod_port: session.remote_port(),
            title,
            icon_url,
            icon_remote_url,
            namespace: session.namespace().to_string(),
            pod_name: session.pod_name().to_string(),
        };

        Self { session, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn namespace(&self) -> &str {
        self.session.namespace()
    }

    /// Stop the underlying tunnel (idempotent)
    pub fn stop(&self) {
        self.session.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_serializes_with_camel_case_names() {
        let endpoint = Endpoint {
            local_port: 40123,
            pod_port: 8080,
            title: "Grafana".to_string(),
            icon_url: "file:///tmp/porthole1.png".to_string(),
            icon_remote_url: "http://localhost:40123/favicon.ico".to_string(),
            namespace: "default".to_string(),
            pod_name: "web-0".to_string(),
        };

        let json = serde_json::to_value(&endpoint).unwrap();
        assert_eq!(json["localPort"], 40123);
        assert_eq!(json["podPort"], 8080);
        assert_eq!(json["iconUrl"], "file:///tmp/porthole1.png");
        assert_eq!(json["iconRemoteUrl"], "http://localhost:40123/favicon.ico");
        assert_eq!(json["podName"], "web-0");
        assert_eq!(json["namespace"], "default");
        assert_eq!(json["title"], "Grafana");
    }

    #[test]
    fn empty_title_falls_back_to_pod_name() {
        let session = TunnelSession::detached(40000, 8080, "web-0", "default");
        let forwarded = ForwardedEndpoint::new(session, None, String::new());

        assert_eq!(forwarded.endpoint().title, "web-0");
        assert_eq!(forwarded.endpoint().icon_url, "");
        assert_eq!(forwarded.endpoint().icon_remote_url, "");
    }
}
