use serde::{Deserialize, Serialize};

use crate::resource::KubeResource;

/// Coarse per-resource health used by the namespace topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Progressing => "progressing",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one resource. Kind comparison is case-insensitive so callers
/// may pass user input or discovery output interchangeably.
pub fn classify(resource: &KubeResource) -> HealthStatus {
    let kind = resource.kind().unwrap_or_default().to_ascii_lowercase();
    match kind.as_str() {
        "pod" => pod_health(resource),
        "deployment" | "statefulset" | "daemonset" | "replicaset" => workload_health(resource),
        "service" => HealthStatus::Healthy,
        "ingress" => ingress_health(resource),
        "persistentvolumeclaim" => pvc_health(resource),
        "job" => job_health(resource),
        _ => condition_health(resource),
    }
}

fn pod_health(resource: &KubeResource) -> HealthStatus {
    match resource.nested_str(&["status", "phase"]) {
        Some("Running") | Some("Succeeded") => HealthStatus::Healthy,
        Some("Pending") => HealthStatus::Progressing,
        Some("Failed") => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}

fn workload_health(resource: &KubeResource) -> HealthStatus {
    let desired = resource.nested_i64(&["spec", "replicas"]).unwrap_or(1);
    let available = resource
        .nested_i64(&["status", "availableReplicas"])
        .unwrap_or(0);
    if available == desired {
        HealthStatus::Healthy
    } else if available > 0 && available < desired {
        HealthStatus::Progressing
    } else {
        HealthStatus::Unhealthy
    }
}

fn ingress_health(resource: &KubeResource) -> HealthStatus {
    match resource.nested_slice(&["status", "loadBalancer", "ingress"]) {
        Some(entries) if !entries.is_empty() => HealthStatus::Healthy,
        _ => HealthStatus::Progressing,
    }
}

fn pvc_health(resource: &KubeResource) -> HealthStatus {
    match resource.nested_str(&["status", "phase"]) {
        Some("Bound") => HealthStatus::Healthy,
        Some("Pending") => HealthStatus::Progressing,
        _ => HealthStatus::Unhealthy,
    }
}

fn job_health(resource: &KubeResource) -> HealthStatus {
    if condition_true(resource, "Complete") {
        HealthStatus::Healthy
    } else if condition_true(resource, "Failed") {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Progressing
    }
}

/// Fallback for kinds without dedicated rules, including CRDs: look for
/// conventional status conditions.
fn condition_health(resource: &KubeResource) -> HealthStatus {
    if condition_true(resource, "Ready") || condition_true(resource, "Available") {
        return HealthStatus::Healthy;
    }
    if condition_true(resource, "Progressing") {
        return HealthStatus::Progressing;
    }
    if condition_true(resource, "Failed") || condition_true(resource, "Error") {
        return HealthStatus::Unhealthy;
    }
    HealthStatus::Unknown
}

fn condition_true(resource: &KubeResource, condition_type: &str) -> bool {
    let Some(conditions) = resource.nested_slice(&["status", "conditions"]) else {
        return false;
    };
    conditions.iter().any(|c| {
        c.get("type").and_then(|v| v.as_str()) == Some(condition_type)
            && c.get("status").and_then(|v| v.as_str()) == Some("True")
    })
}
