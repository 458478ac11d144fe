//! Endpoint discovery
//!
//! Computes the set of forwardable (pod, port) pairs for a namespace:
//! running pods reduced to one representative per owning controller, with
//! service-declared target ports taking priority over bare container ports.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::client::{KubeClient, KubeClientError};

/// Sentinel namespace name meaning an unscoped, cluster-wide query
pub const ALL_NAMESPACES: &str = "All Namespaces";

/// Identity of the pod a pair forwards into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
}

/// Which resource declared the target port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSource {
    /// Declared by a service of this name
    Service(String),
    /// Declared by a container of this name, unclaimed by any service
    Container(String),
}

/// A pod + target port combination eligible for tunneling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardablePair {
    pub pod: PodRef,
    pub target_port: u16,
    pub source: PairSource,
}

/// List pods and services in scope and compute the forwardable pairs.
///
/// Pods in `skip_namespaces` are left out; the caller passes the already
/// active namespaces when activating the all-namespaces sentinel so their
/// tunnels are not opened twice. Either list call failing aborts the whole
/// discovery - partial results are never returned as success.
pub async fn discover(
    client: &KubeClient,
    namespace: &str,
    skip_namespaces: &[String],
) -> Result<Vec<ForwardablePair>, KubeClientError> {
    let scope = if namespace == ALL_NAMESPACES {
        None
    } else {
        Some(namespace)
    };

    let pods = client.list_pods(scope).await?;
    let services = client.list_services(scope).await?;
    tracing::debug!(
        "discovery in {namespace}: {} pods, {} services",
        pods.len(),
        services.len()
    );

    Ok(forwardable_pairs(&pods, &services, skip_namespaces))
}

/// Pure core of [`discover`]: computes pairs from already-listed resources.
pub fn forwardable_pairs(
    pods: &[Pod],
    services: &[Service],
    skip_namespaces: &[String],
) -> Vec<ForwardablePair> {
    let mut seen_controllers: HashSet<String> = HashSet::new();
    let mut pairs = Vec::new();

    for pod in pods {
        let Some(name) = pod.metadata.name.as_deref() else {
            continue;
        };
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();

        if skip_namespaces.iter().any(|n| n == &namespace) {
            continue;
        }
        // skip not running pods
        if pod.status.as_ref().and_then(|s| s.phase.as_deref()) != Some("Running") {
            continue;
        }
        // has been scheduled for deletion
        if pod.metadata.deletion_timestamp.is_some() {
            continue;
        }
        // one representative pod per owning controller
        if is_duplicate_replica(pod, &namespace, &mut seen_controllers) {
            continue;
        }

        let handled = service_pairs(pod, name, &namespace, services, &mut pairs);
        container_pairs(pod, name, &namespace, handled, &mut pairs);
    }

    pairs
}

/// Records the pod's RS/STS/DS owners and reports whether any of them was
/// already represented by an earlier pod in this discovery call.
fn is_duplicate_replica(
    pod: &Pod,
    namespace: &str,
    seen_controllers: &mut HashSet<String>,
) -> bool {
    let Some(owners) = &pod.metadata.owner_references else {
        return false;
    };

    for owner in owners {
        if matches!(owner.kind.as_str(), "ReplicaSet" | "StatefulSet" | "DaemonSet")
            && !seen_controllers.insert(format!("{namespace}/{}", owner.name))
        {
            return true;
        }
    }
    false
}

/// Emits one pair per service target port matching the pod. Returns the set
/// of target ports claimed by services, so the container pass can skip them.
fn service_pairs(
    pod: &Pod,
    pod_name: &str,
    namespace: &str,
    services: &[Service],
    pairs: &mut Vec<ForwardablePair>,
) -> HashSet<u16> {
    let mut handled: HashSet<u16> = HashSet::new();

    for svc in services {
        if svc.metadata.namespace.as_deref() != Some(namespace) {
            continue;
        }
        let Some(spec) = &svc.spec else { continue };
        // an absent or empty selector matches nothing
        let Some(selector) = &spec.selector else {
            continue;
        };
        if selector.is_empty() || !selector_matches(selector, pod) {
            continue;
        }

        let svc_name = svc.metadata.name.as_deref().unwrap_or_default();
        for port in spec.ports.as_deref().unwrap_or_default() {
            let Some(target) = resolve_target_port(port.target_port.as_ref(), port.port, pod)
            else {
                tracing::debug!(
                    "skipped unresolvable target port on service {svc_name} for pod {pod_name}"
                );
                continue;
            };
            if !handled.insert(target) {
                // already claimed by another service on this pod
                tracing::info!(
                    "skipped port {target} for service {svc_name} as it has already been handled"
                );
                continue;
            }
            pairs.push(ForwardablePair {
                pod: PodRef {
                    name: pod_name.to_string(),
                    namespace: namespace.to_string(),
                },
                target_port: target,
                source: PairSource::Service(svc_name.to_string()),
            });
        }
    }

    handled
}

/// Emits a pair for every container port the service pass left unclaimed.
fn container_pairs(
    pod: &Pod,
    pod_name: &str,
    namespace: &str,
    mut handled: HashSet<u16>,
    pairs: &mut Vec<ForwardablePair>,
) {
    let Some(spec) = &pod.spec else { return };

    for container in &spec.containers {
        for port in container.ports.as_deref().unwrap_or_default() {
            let Ok(target) = u16::try_from(port.container_port) else {
                continue;
            };
            if target == 0 || !handled.insert(target) {
                continue;
            }
            pairs.push(ForwardablePair {
                pod: PodRef {
                    name: pod_name.to_string(),
                    namespace: namespace.to_string(),
                },
                target_port: target,
                source: PairSource::Container(container.name.clone()),
            });
        }
    }
}

/// A selector is a conjunction: every key/value pair must be present in the
/// pod's labels.
fn selector_matches(selector: &std::collections::BTreeMap<String, String>, pod: &Pod) -> bool {
    let Some(labels) = &pod.metadata.labels else {
        return false;
    };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Numeric target ports are taken as-is; named ones are looked up among the
/// pod's container port names; an absent target port defaults to the
/// service port value.
fn resolve_target_port(target: Option<&IntOrString>, service_port: i32, pod: &Pod) -> Option<u16> {
    match target {
        Some(IntOrString::Int(value)) => u16::try_from(*value).ok().filter(|p| *p != 0),
        Some(IntOrString::String(name)) => {
            let spec = pod.spec.as_ref()?;
            spec.containers
                .iter()
                .flat_map(|c| c.ports.as_deref().unwrap_or_default())
                .find(|p| p.name.as_deref() == Some(name.as_str()))
                .and_then(|p| u16::try_from(p.container_port).ok())
                .filter(|p| *p != 0)
        }
        None => u16::try_from(service_port).ok().filter(|p| *p != 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodStatus, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
    use k8s_openapi::jiff::Timestamp;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn running_pod(name: &str, namespace: &str, label_pairs: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels(label_pairs)),
                ..Default::default()
            },
            spec: Some(PodSpec::default()),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        }
    }

    fn with_container_port(mut pod: Pod, container: &str, port: i32, port_name: Option<&str>) -> Pod {
        let spec = pod.spec.get_or_insert_with(PodSpec::default);
        spec.containers.push(Container {
            name: container.to_string(),
            ports: Some(vec![ContainerPort {
                container_port: port,
                name: port_name.map(String::from),
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod
    }

    fn with_owner(mut pod: Pod, kind: &str, owner: &str) -> Pod {
        pod.metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(OwnerReference {
                kind: kind.to_string(),
                name: owner.to_string(),
                ..Default::default()
            });
        pod
    }

    fn service(name: &str, namespace: &str, selector: &[(&str, &str)], ports: &[(i32, Option<IntOrString>)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: if selector.is_empty() {
                    None
                } else {
                    Some(labels(selector))
                },
                ports: Some(
                    ports
                        .iter()
                        .map(|(port, target)| ServicePort {
                            port: *port,
                            target_port: target.clone(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn skips_pods_that_are_not_running() {
        let mut pending = with_container_port(running_pod("idle", "default", &[]), "app", 8080, None);
        pending.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });

        assert!(forwardable_pairs(&[pending], &[], &[]).is_empty());
    }

    #[test]
    fn skips_pods_pending_deletion() {
        let mut doomed = with_container_port(running_pod("doomed", "default", &[]), "app", 8080, None);
        doomed.metadata.deletion_timestamp = Some(Time(Timestamp::now()));

        assert!(forwardable_pairs(&[doomed], &[], &[]).is_empty());
    }

    #[test]
    fn one_representative_per_controller() {
        let pods: Vec<Pod> = (0..3)
            .map(|i| {
                with_owner(
                    with_container_port(
                        running_pod(&format!("web-{i}"), "default", &[]),
                        "app",
                        8080,
                        None,
                    ),
                    "ReplicaSet",
                    "web-rs",
                )
            })
            .collect();

        let pairs = forwardable_pairs(&pods, &[], &[]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pod.name, "web-0");
    }

    #[test]
    fn same_controller_name_in_other_namespace_is_distinct() {
        let pods = vec![
            with_owner(
                with_container_port(running_pod("web-0", "alpha", &[]), "app", 8080, None),
                "StatefulSet",
                "web",
            ),
            with_owner(
                with_container_port(running_pod("web-0", "beta", &[]), "app", 8080, None),
                "StatefulSet",
                "web",
            ),
        ];

        assert_eq!(forwardable_pairs(&pods, &[], &[]).len(), 2);
    }

    #[test]
    fn service_port_claims_target_and_container_fallback_covers_rest() {
        // "default" has pod web-0 (app=web) behind web-svc on 8080, and the
        // container also exposes an unclaimed 9090
        let pod = with_container_port(
            with_container_port(
                running_pod("web-0", "default", &[("app", "web")]),
                "web",
                8080,
                None,
            ),
            "web",
            9090,
            None,
        );
        let svc = service(
            "web-svc",
            "default",
            &[("app", "web")],
            &[(80, Some(IntOrString::Int(8080)))],
        );

        let pairs = forwardable_pairs(&[pod], &[svc], &[]);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].target_port, 8080);
        assert_eq!(pairs[0].source, PairSource::Service("web-svc".to_string()));
        assert_eq!(pairs[1].target_port, 9090);
        assert_eq!(pairs[1].source, PairSource::Container("web".to_string()));
    }

    #[test]
    fn overlapping_services_emit_each_port_once() {
        let pod = with_container_port(
            running_pod("api-0", "default", &[("app", "api")]),
            "api",
            8080,
            None,
        );
        let first = service(
            "api-a",
            "default",
            &[("app", "api")],
            &[(80, Some(IntOrString::Int(8080)))],
        );
        let second = service(
            "api-b",
            "default",
            &[("app", "api")],
            &[(8080, Some(IntOrString::Int(8080)))],
        );

        let pairs = forwardable_pairs(&[pod], &[first, second], &[]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source, PairSource::Service("api-a".to_string()));
    }

    #[test]
    fn selector_is_a_conjunction() {
        let pod = with_container_port(
            running_pod("api-0", "default", &[("app", "api")]),
            "api",
            8080,
            None,
        );
        let svc = service(
            "api-svc",
            "default",
            &[("app", "api"), ("tier", "backend")],
            &[(80, Some(IntOrString::Int(8080)))],
        );

        let pairs = forwardable_pairs(&[pod], &[svc], &[]);
        // service did not match, so the port falls through to the container path
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source, PairSource::Container("api".to_string()));
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let pod = with_container_port(
            running_pod("api-0", "default", &[("app", "api")]),
            "api",
            8080,
            None,
        );
        let svc = service("open-svc", "default", &[], &[(80, Some(IntOrString::Int(8080)))]);

        let pairs = forwardable_pairs(&[pod], &[svc], &[]);
        assert_eq!(pairs[0].source, PairSource::Container("api".to_string()));
    }

    #[test]
    fn service_in_other_namespace_does_not_match() {
        let pod = with_container_port(
            running_pod("api-0", "alpha", &[("app", "api")]),
            "api",
            8080,
            None,
        );
        let svc = service(
            "api-svc",
            "beta",
            &[("app", "api")],
            &[(80, Some(IntOrString::Int(8080)))],
        );

        let pairs = forwardable_pairs(&[pod], &[svc], &[]);
        assert_eq!(pairs[0].source, PairSource::Container("api".to_string()));
    }

    #[test]
    fn named_target_port_resolves_against_container_ports() {
        let pod = with_container_port(
            running_pod("api-0", "default", &[("app", "api")]),
            "api",
            8443,
            Some("https"),
        );
        let svc = service(
            "api-svc",
            "default",
            &[("app", "api")],
            &[(443, Some(IntOrString::String("https".to_string())))],
        );

        let pairs = forwardable_pairs(&[pod], &[svc], &[]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].target_port, 8443);
        assert_eq!(pairs[0].source, PairSource::Service("api-svc".to_string()));
    }

    #[test]
    fn absent_target_port_defaults_to_service_port() {
        let pod = running_pod("api-0", "default", &[("app", "api")]);
        let svc = service("api-svc", "default", &[("app", "api")], &[(8080, None)]);

        let pairs = forwardable_pairs(&[pod], &[svc], &[]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].target_port, 8080);
    }

    #[test]
    fn duplicate_container_ports_emit_once() {
        let pod = with_container_port(
            with_container_port(running_pod("dup-0", "default", &[]), "a", 8080, None),
            "b",
            8080,
            None,
        );

        let pairs = forwardable_pairs(&[pod], &[], &[]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source, PairSource::Container("a".to_string()));
    }

    #[test]
    fn skip_namespaces_filters_pods() {
        let pods = vec![
            with_container_port(running_pod("a-0", "alpha", &[]), "app", 8080, None),
            with_container_port(running_pod("b-0", "beta", &[]), "app", 8080, None),
        ];

        let pairs = forwardable_pairs(&pods, &[], &["alpha".to_string()]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pod.namespace, "beta");
    }
}
