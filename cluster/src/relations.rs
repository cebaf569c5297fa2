use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::KubeResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Owns,
    Selects,
    Mounts,
    Configures,
    Binds,
    Routes,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Owns => "owns",
            RelationType::Selects => "selects",
            RelationType::Mounts => "mounts",
            RelationType::Configures => "configures",
            RelationType::Binds => "binds",
            RelationType::Routes => "routes",
        }
    }
}

/// A typed edge between two resources. Deduplicated on the full 7-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub source_kind: String,
    pub source_name: String,
    pub source_namespace: String,
    pub target_kind: String,
    pub target_name: String,
    pub target_namespace: String,
    pub relation: RelationType,
}

/// Infer the edge set for one namespace from the full resource listing,
/// keyed by canonical kind. Emitted edges are deduplicated; first emission
/// order is preserved.
pub fn infer(namespace: &str, by_kind: &HashMap<String, Vec<KubeResource>>) -> Vec<Relationship> {
    let mut edges = EdgeSet::default();

    for resources in by_kind.values() {
        for resource in resources {
            owner_edges(namespace, resource, &mut edges);
        }
    }

    let pods = by_kind.get("Pod").map(Vec::as_slice).unwrap_or_default();
    for service in by_kind.get("Service").map(Vec::as_slice).unwrap_or_default() {
        selector_edges(namespace, service, pods, &mut edges);
    }
    for pod in pods {
        volume_edges(namespace, pod, &mut edges);
        env_edges(namespace, pod, &mut edges);
    }
    for pvc in by_kind
        .get("PersistentVolumeClaim")
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        binding_edges(namespace, pvc, &mut edges);
    }
    for ingress in by_kind.get("Ingress").map(Vec::as_slice).unwrap_or_default() {
        routing_edges(namespace, ingress, &mut edges);
    }

    edges.into_vec()
}

#[derive(Default)]
struct EdgeSet {
    seen: HashSet<Relationship>,
    ordered: Vec<Relationship>,
}

impl EdgeSet {
    fn push(&mut self, edge: Relationship) {
        if self.seen.insert(edge.clone()) {
            self.ordered.push(edge);
        }
    }

    fn into_vec(self) -> Vec<Relationship> {
        self.ordered
    }
}

fn owner_edges(namespace: &str, resource: &KubeResource, edges: &mut EdgeSet) {
    let Some(name) = resource.name() else { return };
    let Some(kind) = resource.kind() else { return };
    for owner in resource.owner_refs() {
        edges.push(Relationship {
            source_kind: owner.kind,
            source_name: owner.name,
            source_namespace: namespace.to_string(),
            target_kind: kind.to_string(),
            target_name: name.to_string(),
            target_namespace: namespace.to_string(),
            relation: RelationType::Owns,
        });
    }
}

fn selector_edges(namespace: &str, service: &KubeResource, pods: &[KubeResource], edges: &mut EdgeSet) {
    let Some(service_name) = service.name() else { return };
    let Some(selector) = service.nested_map(&["spec", "selector"]) else {
        return;
    };
    if selector.is_empty() {
        return;
    }
    for pod in pods {
        let Some(pod_name) = pod.name() else { continue };
        let matches = selector.iter().all(|(key, expected)| {
            pod.labels()
                .and_then(|labels| labels.get(key))
                .map(|actual| actual == expected)
                .unwrap_or(false)
        });
        if matches {
            edges.push(Relationship {
                source_kind: "Service".into(),
                source_name: service_name.to_string(),
                source_namespace: namespace.to_string(),
                target_kind: "Pod".into(),
                target_name: pod_name.to_string(),
                target_namespace: namespace.to_string(),
                relation: RelationType::Selects,
            });
        }
    }
}

fn volume_edges(namespace: &str, pod: &KubeResource, edges: &mut EdgeSet) {
    let Some(pod_name) = pod.name() else { return };
    let Some(volumes) = pod.nested_slice(&["spec", "volumes"]) else {
        return;
    };
    for volume in volumes {
        if let Some(name) = volume
            .get("configMap")
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
        {
            edges.push(mount(namespace, pod_name, "ConfigMap", name));
        }
        if let Some(name) = volume
            .get("secret")
            .and_then(|v| v.get("secretName"))
            .and_then(Value::as_str)
        {
            edges.push(mount(namespace, pod_name, "Secret", name));
        }
    }
}

fn mount(namespace: &str, pod: &str, target_kind: &str, target: &str) -> Relationship {
    Relationship {
        source_kind: "Pod".into(),
        source_name: pod.to_string(),
        source_namespace: namespace.to_string(),
        target_kind: target_kind.to_string(),
        target_name: target.to_string(),
        target_namespace: namespace.to_string(),
        relation: RelationType::Mounts,
    }
}

fn env_edges(namespace: &str, pod: &KubeResource, edges: &mut EdgeSet) {
    let Some(pod_name) = pod.name() else { return };
    let Some(containers) = pod.nested_slice(&["spec", "containers"]) else {
        return;
    };
    for container in containers {
        for source in container
            .get("envFrom")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            if let Some(name) = source
                .get("configMapRef")
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
            {
                edges.push(configures(namespace, pod_name, "ConfigMap", name));
            }
            if let Some(name) = source
                .get("secretRef")
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
            {
                edges.push(configures(namespace, pod_name, "Secret", name));
            }
        }
        for env in container
            .get("env")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let value_from = env.get("valueFrom");
            if let Some(name) = value_from
                .and_then(|v| v.get("configMapKeyRef"))
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
            {
                edges.push(configures(namespace, pod_name, "ConfigMap", name));
            }
            if let Some(name) = value_from
                .and_then(|v| v.get("secretKeyRef"))
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
            {
                edges.push(configures(namespace, pod_name, "Secret", name));
            }
        }
    }
}

fn configures(namespace: &str, pod: &str, target_kind: &str, target: &str) -> Relationship {
    Relationship {
        source_kind: "Pod".into(),
        source_name: pod.to_string(),
        source_namespace: namespace.to_string(),
        target_kind: target_kind.to_string(),
        target_name: target.to_string(),
        target_namespace: namespace.to_string(),
        relation: RelationType::Configures,
    }
}

fn binding_edges(namespace: &str, pvc: &KubeResource, edges: &mut EdgeSet) {
    let Some(pvc_name) = pvc.name() else { return };
    let Some(volume) = pvc.nested_str(&["spec", "volumeName"]) else {
        return;
    };
    if volume.is_empty() {
        return;
    }
    // PersistentVolumes are cluster-scoped; target namespace stays empty.
    edges.push(Relationship {
        source_kind: "PersistentVolumeClaim".into(),
        source_name: pvc_name.to_string(),
        source_namespace: namespace.to_string(),
        target_kind: "PersistentVolume".into(),
        target_name: volume.to_string(),
        target_namespace: String::new(),
        relation: RelationType::Binds,
    });
}

fn routing_edges(namespace: &str, ingress: &KubeResource, edges: &mut EdgeSet) {
    let Some(ingress_name) = ingress.name() else { return };
    let Some(rules) = ingress.nested_slice(&["spec", "rules"]) else {
        return;
    };
    for rule in rules {
        for path in rule
            .get("http")
            .and_then(|v| v.get("paths"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let backend = path.get("backend");
            // networking.k8s.io/v1 shape, then the legacy v1beta1 shape.
            let service = backend
                .and_then(|b| b.get("service"))
                .and_then(|s| s.get("name"))
                .and_then(Value::as_str)
                .or_else(|| {
                    backend
                        .and_then(|b| b.get("serviceName"))
                        .and_then(Value::as_str)
                });
            if let Some(service) = service {
                edges.push(Relationship {
                    source_kind: "Ingress".into(),
                    source_name: ingress_name.to_string(),
                    source_namespace: namespace.to_string(),
                    target_kind: "Service".into(),
                    target_name: service.to_string(),
                    target_namespace: namespace.to_string(),
                    relation: RelationType::Routes,
                });
            }
        }
    }
}
