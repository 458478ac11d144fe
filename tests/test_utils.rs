//! Test utilities for Porthole
//!
//! Builders for the pod and service fixtures the discovery tests feed
//! through the pair computation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A running pod with the given labels and one container exposing `ports`
pub fn running_pod(name: &str, namespace: &str, label_pairs: &[(&str, &str)], ports: &[i32]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(label_pairs)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                ports: Some(
                    ports
                        .iter()
                        .map(|p| ContainerPort {
                            container_port: *p,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// Same pod shape, owned by a controller of the given kind and name
pub fn replica_pod(
    name: &str,
    namespace: &str,
    label_pairs: &[(&str, &str)],
    ports: &[i32],
    owner_kind: &str,
    owner_name: &str,
) -> Pod {
    let mut pod = running_pod(name, namespace, label_pairs, ports);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        kind: owner_kind.to_string(),
        name: owner_name.to_string(),
        ..Default::default()
    }]);
    pod
}

/// A service selecting `selector` with one port targeting `target_port`
pub fn service(name: &str, namespace: &str, selector: &[(&str, &str)], target_port: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels(selector)),
            ports: Some(vec![ServicePort {
                port: 80,
                target_port: Some(IntOrString::Int(target_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
