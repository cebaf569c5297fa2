use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use opscope_cluster::client::ClusterClient;
use opscope_cluster::health::{self, HealthStatus};
use opscope_cluster::resource::{Event, KubeResource};

use crate::context::{ArgoLink, Category, Issue, IssueSource, ResourceContext, Severity, SourceLink};
use crate::recommend;

/// Classifies a populated [`ResourceContext`] (plus the raw object when
/// available) into issues and recommendations.
///
/// Pure with respect to its inputs except for the per-volume PVC fetch,
/// which fails softly into a `VolumeIssue`.
pub struct Classifier {
    cluster: Option<Arc<dyn ClusterClient>>,
}

impl Classifier {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster: Some(cluster),
        }
    }

    /// A classifier without cluster access; PVC lookups are skipped.
    pub fn detached() -> Self {
        Self { cluster: None }
    }

    /// Issue order is deterministic: event scan first (in event order),
    /// then pod checks, deployment checks, GitOps-derived checks,
    /// source-host-derived checks, and the not-healthy fallback.
    pub async fn classify(
        &self,
        cancel: &CancellationToken,
        rc: &ResourceContext,
        raw: Option<&KubeResource>,
    ) -> (Vec<Issue>, Vec<String>) {
        let mut issues = scan_events(&rc.events);

        if let Some(raw) = raw {
            if rc.kind.eq_ignore_ascii_case("pod") {
                issues.extend(pod_issues(raw));
                issues.extend(self.volume_issues(cancel, raw, &rc.namespace).await);
            }
            if rc.kind.eq_ignore_ascii_case("deployment") {
                issues.extend(deployment_issues(raw));
            }
        }
        if let Some(argo) = &rc.argo {
            issues.extend(gitops_issues(argo));
        }
        if let Some(link) = &rc.source_project {
            issues.extend(source_host_issues(link));
        }

        if issues.is_empty()
            && let Some(raw) = raw
            && health::classify(raw) != HealthStatus::Healthy
        {
            issues.push(k8s_issue(
                Category::UnknownIssue,
                Severity::Warning,
                "Resource Not Healthy",
                format!("{}/{} is not reporting a healthy status", rc.kind, rc.name),
            ));
        }

        let recommendations = recommend::recommend(&issues);
        (issues, recommendations)
    }

    async fn volume_issues(
        &self,
        cancel: &CancellationToken,
        pod: &KubeResource,
        namespace: &str,
    ) -> Vec<Issue> {
        let Some(cluster) = &self.cluster else {
            return Vec::new();
        };
        let Some(volumes) = pod.nested_slice(&["spec", "volumes"]) else {
            return Vec::new();
        };

        let mut issues = Vec::new();
        for volume in volumes {
            let Some(claim) = volume
                .get("persistentVolumeClaim")
                .and_then(|v| v.get("claimName"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let resolved = match cluster.resolve(cancel, "persistentvolumeclaim").await {
                Ok(resolved) => resolved,
                Err(e) => {
                    issues.push(volume_issue(
                        "PVC Not Found",
                        format!("PersistentVolumeClaim {claim} could not be resolved: {e}"),
                    ));
                    continue;
                }
            };
            match cluster.get(cancel, &resolved, namespace, claim).await {
                Ok(pvc) => {
                    let phase = pvc.nested_str(&["status", "phase"]).unwrap_or("Unknown");
                    if phase != "Bound" {
                        issues.push(volume_issue(
                            "PVC Not Bound",
                            format!("PersistentVolumeClaim {claim} is in phase {phase}"),
                        ));
                    }
                }
                Err(e) => {
                    issues.push(volume_issue(
                        "PVC Not Found",
                        format!("PersistentVolumeClaim {claim} could not be fetched: {e}"),
                    ));
                }
            }
        }
        issues
    }
}

fn k8s_issue(category: Category, severity: Severity, title: &str, description: String) -> Issue {
    Issue {
        title: title.to_string(),
        category,
        severity,
        source: IssueSource::Kubernetes,
        description,
    }
}

fn volume_issue(title: &str, description: String) -> Issue {
    k8s_issue(Category::VolumeIssue, Severity::Warning, title, description)
}

/// Classify warning events by substring, with a fixed tie-break precedence.
pub fn scan_events(events: &[Event]) -> Vec<Issue> {
    events
        .iter()
        .filter(|e| e.is_warning())
        .map(classify_event)
        .collect()
}

fn classify_event(event: &Event) -> Issue {
    let description = format!("{}: {}", event.reason, event.message);
    let (category, title) = if event.reason.contains("Failed") && event.message.contains("ImagePull")
    {
        (Category::ImagePullError, "Image Pull Failure")
    } else if event.reason.contains("Unhealthy") {
        (Category::HealthCheckFailure, "Health Check Failure")
    } else if event.message.contains("memory") {
        (Category::ResourceIssue, "Memory Resource Issue")
    } else if event.message.contains("cpu") {
        (Category::ResourceIssue, "CPU Resource Issue")
    } else if event.reason.contains("BackOff") {
        (Category::CrashLoopBackOff, "Container Crash Loop")
    } else {
        (Category::OtherWarning, "Kubernetes Warning")
    };
    k8s_issue(category, Severity::Warning, title, description)
}

fn pod_issues(pod: &KubeResource) -> Vec<Issue> {
    let mut issues = Vec::new();

    let phase = pod.nested_str(&["status", "phase"]).unwrap_or("Unknown");
    if phase != "Running" && phase != "Succeeded" {
        let (category, severity, title) = match phase {
            "Failed" => (Category::PodFailed, Severity::Error, "Pod Failed"),
            "Pending" => (Category::PodPending, Severity::Warning, "Pod Pending"),
            _ => (Category::PodNotRunning, Severity::Warning, "Pod Not Running"),
        };
        issues.push(k8s_issue(category, severity, title, format!("Pod is in phase {phase}")));
    }

    if let Some(conditions) = pod.nested_slice(&["status", "conditions"]) {
        for condition in conditions {
            let ctype = condition.get("type").and_then(Value::as_str).unwrap_or_default();
            let status = condition
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if status != "False" {
                continue;
            }
            let mapped = match ctype {
                "PodScheduled" => Some((Category::SchedulingIssue, "Pod Scheduling Issue")),
                "Initialized" => Some((Category::InitializationIssue, "Pod Initialization Issue")),
                "ContainersReady" => {
                    Some((Category::ContainerReadinessIssue, "Containers Not Ready"))
                }
                "Ready" => Some((Category::PodNotReady, "Pod Not Ready")),
                _ => None,
            };
            if let Some((category, title)) = mapped {
                let reason = condition.get("reason").and_then(Value::as_str).unwrap_or("");
                let message = condition.get("message").and_then(Value::as_str).unwrap_or("");
                issues.push(k8s_issue(
                    category,
                    Severity::Warning,
                    title,
                    format!("{ctype}=False {reason}: {message}"),
                ));
            }
        }
    }

    for (path, label) in [
        (["status", "containerStatuses"], "Container"),
        (["status", "initContainerStatuses"], "Init Container"),
    ] {
        let Some(statuses) = pod.nested_slice(&path) else {
            continue;
        };
        for status in statuses {
            issues.extend(container_issues(status, label));
        }
    }

    issues
}

fn container_issues(status: &Value, label: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let name = status.get("name").and_then(Value::as_str).unwrap_or("unknown");

    if let Some(waiting) = status.get("state").and_then(|s| s.get("waiting")) {
        let reason = waiting.get("reason").and_then(Value::as_str).unwrap_or("");
        let message = waiting.get("message").and_then(Value::as_str).unwrap_or("");
        let issue = match reason {
            "CrashLoopBackOff" => k8s_issue(
                Category::CrashLoopBackOff,
                Severity::Error,
                &format!("{label} Crash Loop"),
                format!("{label} {name} is in CrashLoopBackOff: {message}"),
            ),
            "ImagePullBackOff" | "ErrImagePull" => k8s_issue(
                Category::ImagePullError,
                Severity::Warning,
                &format!("{label} Image Pull Failure"),
                format!("{label} {name} cannot pull its image ({reason}): {message}"),
            ),
            "PodInitializing" | "ContainerCreating" => k8s_issue(
                Category::PodInitializing,
                Severity::Warning,
                &format!("{label} Initializing"),
                format!("{label} {name} is still initializing ({reason})"),
            ),
            _ => k8s_issue(
                Category::ContainerWaiting,
                Severity::Warning,
                &format!("{label} Waiting"),
                format!("{label} {name} is waiting ({reason}): {message}"),
            ),
        };
        issues.push(issue);
    }

    if let Some(exit_code) = status
        .get("state")
        .and_then(|s| s.get("terminated"))
        .and_then(|t| t.get("exitCode"))
        .and_then(Value::as_i64)
        && exit_code != 0
    {
        issues.push(k8s_issue(
            Category::ContainerTerminated,
            Severity::Error,
            &format!("{label} Terminated"),
            format!("{label} {name} terminated with exit code {exit_code}"),
        ));
    }

    if let Some(restarts) = status.get("restartCount").and_then(Value::as_i64)
        && restarts > 3
    {
        issues.push(k8s_issue(
            Category::FrequentRestarts,
            Severity::Warning,
            &format!("{label} Restarting Frequently"),
            format!("{label} {name} has restarted {restarts} times"),
        ));
    }

    issues
}

fn deployment_issues(deployment: &KubeResource) -> Vec<Issue> {
    let mut issues = Vec::new();

    let desired = deployment.nested_i64(&["spec", "replicas"]).unwrap_or(1);
    let available = deployment
        .nested_i64(&["status", "availableReplicas"])
        .unwrap_or(0);
    let ready = deployment
        .nested_i64(&["status", "readyReplicas"])
        .unwrap_or(0);

    if available < desired {
        issues.push(k8s_issue(
            Category::DeploymentNotAvailable,
            Severity::Warning,
            "Deployment Not Available",
            format!("only {available} of {desired} replicas are available"),
        ));
    }
    if ready < desired {
        issues.push(k8s_issue(
            Category::DeploymentNotReady,
            Severity::Warning,
            "Deployment Not Ready",
            format!("only {ready} of {desired} replicas are ready"),
        ));
    }

    if let Some(conditions) = deployment.nested_slice(&["status", "conditions"]) {
        for condition in conditions {
            let ctype = condition.get("type").and_then(Value::as_str).unwrap_or_default();
            let status = condition
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if status != "False" {
                continue;
            }
            let reason = condition.get("reason").and_then(Value::as_str).unwrap_or("");
            let message = condition.get("message").and_then(Value::as_str).unwrap_or("");
            match ctype {
                "Available" => issues.push(k8s_issue(
                    Category::DeploymentNotAvailable,
                    Severity::Warning,
                    "Deployment Not Available",
                    format!("Available=False {reason}: {message}"),
                )),
                "Progressing" => issues.push(k8s_issue(
                    Category::DeploymentNotProgressing,
                    Severity::Warning,
                    "Deployment Not Progressing",
                    format!("Progressing=False {reason}: {message}"),
                )),
                _ => {}
            }
        }
    }

    issues
}

fn gitops_issues(argo: &ArgoLink) -> Vec<Issue> {
    let mut issues = Vec::new();
    if argo.sync_status != "Synced" {
        issues.push(Issue {
            title: "Application Out of Sync".into(),
            category: Category::SyncIssue,
            severity: Severity::Warning,
            source: IssueSource::GitOps,
            description: format!(
                "application {} reports sync status {}",
                argo.application, argo.sync_status
            ),
        });
    }
    if argo.health_status != "Healthy" {
        issues.push(Issue {
            title: "Application Unhealthy".into(),
            category: Category::HealthIssue,
            severity: Severity::Warning,
            source: IssueSource::GitOps,
            description: format!(
                "application {} reports health status {}",
                argo.application, argo.health_status
            ),
        });
    }
    // History is newest-first; report the most recent failure once.
    if let Some(failed) = argo.sync_history.iter().find(|h| h.status == "Failed") {
        let deployed = failed
            .deployed_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "unknown time".into());
        issues.push(Issue {
            title: "Sync Failure".into(),
            category: Category::SyncFailure,
            severity: Severity::Error,
            source: IssueSource::GitOps,
            description: format!("sync to revision {} failed at {}", failed.revision, deployed),
        });
    }
    issues
}

fn source_host_issues(link: &SourceLink) -> Vec<Issue> {
    let mut issues = Vec::new();
    if let Some(pipeline) = &link.last_pipeline
        && pipeline.status != "success"
    {
        let severity = if pipeline.status == "failed" {
            Severity::Error
        } else {
            Severity::Warning
        };
        issues.push(Issue {
            title: "Pipeline Issue".into(),
            category: Category::PipelineIssue,
            severity,
            source: IssueSource::SourceHost,
            description: format!(
                "last pipeline on {} is {} ({})",
                pipeline.git_ref, pipeline.status, pipeline.sha
            ),
        });
    }
    if let Some(deployment) = &link.last_deployment
        && deployment.status != "success"
    {
        issues.push(Issue {
            title: "Deployment Issue".into(),
            category: Category::DeploymentIssue,
            severity: Severity::Warning,
            source: IssueSource::SourceHost,
            description: format!(
                "last deployment to {} is {}",
                deployment.environment.name, deployment.status
            ),
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeCluster;
    use chrono::{TimeZone, Utc};
    use opscope_cluster::resource::ObjectRef;
    use opscope_gitops::models::HistoryEntry;
    use opscope_sourcehost::models::{EnvironmentRef, Pipeline, Project};
    use serde_json::json;

    fn warning(reason: &str, message: &str) -> Event {
        Event {
            reason: reason.into(),
            message: message.into(),
            event_type: "Warning".into(),
            count: 1,
            first_time: None,
            last_time: None,
            object: ObjectRef::default(),
        }
    }

    fn pod_context() -> ResourceContext {
        ResourceContext::new("Pod", "web-1", "default")
    }

    fn categories(issues: &[Issue]) -> Vec<Category> {
        issues.iter().map(|i| i.category).collect()
    }

    #[tokio::test]
    async fn crash_loop_pod_scenario() {
        let raw = KubeResource::new(json!({
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "default"},
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "web",
                    "restartCount": 2,
                    "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 5m"}}
                }]
            }
        }));
        let mut rc = pod_context();
        rc.events = vec![warning("BackOff", "Back-off restarting failed container")];

        let classifier = Classifier::detached();
        let (issues, recs) = classifier
            .classify(&CancellationToken::new(), &rc, Some(&raw))
            .await;

        let crash_loops = issues
            .iter()
            .filter(|i| i.category == Category::CrashLoopBackOff)
            .count();
        assert_eq!(crash_loops, 2);
        assert!(recs.iter().any(|r| r == "Check container logs for errors."));
    }

    #[tokio::test]
    async fn image_pull_scenario() {
        let raw = KubeResource::new(json!({
            "kind": "Pod",
            "metadata": {"name": "web-1"},
            "status": {
                "phase": "Pending",
                "containerStatuses": [{
                    "name": "web",
                    "state": {"waiting": {"reason": "ErrImagePull", "message": "manifest unknown"}}
                }]
            }
        }));
        let rc = pod_context();

        let (issues, recs) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, Some(&raw))
            .await;

        let pull = issues
            .iter()
            .find(|i| i.category == Category::ImagePullError)
            .expect("image pull issue");
        assert_eq!(pull.severity, Severity::Warning);
        assert!(recs.iter().any(|r| {
            r == "Check image name and credentials for accessing private registries."
        }));
    }

    #[tokio::test]
    async fn underscaled_deployment_scenario() {
        let raw = KubeResource::new(json!({
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 5},
            "status": {
                "availableReplicas": 3,
                "readyReplicas": 3,
                "conditions": [{
                    "type": "Available",
                    "status": "False",
                    "reason": "MinimumReplicasUnavailable",
                    "message": "Deployment does not have minimum availability."
                }]
            }
        }));
        let rc = ResourceContext::new("Deployment", "web", "default");

        let (issues, _) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, Some(&raw))
            .await;

        let cats = categories(&issues);
        let not_available = cats
            .iter()
            .filter(|c| **c == Category::DeploymentNotAvailable)
            .count();
        assert_eq!(not_available, 2);
        assert!(cats.contains(&Category::DeploymentNotReady));
        let descriptions: Vec<_> = issues
            .iter()
            .filter(|i| i.category == Category::DeploymentNotAvailable)
            .map(|i| i.description.clone())
            .collect();
        assert_ne!(descriptions[0], descriptions[1]);
        assert!(descriptions[1].contains("MinimumReplicasUnavailable"));
    }

    #[tokio::test]
    async fn gitops_out_of_sync_scenario() {
        let mut rc = pod_context();
        rc.argo = Some(ArgoLink {
            application: "web".into(),
            sync_status: "OutOfSync".into(),
            health_status: "Healthy".into(),
            sync_history: vec![HistoryEntry {
                id: 9,
                revision: "abc".into(),
                status: "Failed".into(),
                deployed_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            }],
        });

        let (issues, _) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, None)
            .await;

        assert_eq!(
            categories(&issues),
            vec![Category::SyncIssue, Category::SyncFailure]
        );
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[1].severity, Severity::Error);
        assert!(issues[1].description.contains("abc"));
        assert!(issues[1].description.contains("2025-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn no_argo_means_no_gitops_issues() {
        let mut rc = pod_context();
        rc.events = vec![warning("BackOff", "restarting")];
        let (issues, _) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, None)
            .await;
        assert!(issues.iter().all(|i| i.source != IssueSource::GitOps));
    }

    #[tokio::test]
    async fn event_precedence_memory_beats_backoff() {
        let rc = {
            let mut rc = pod_context();
            rc.events = vec![warning("BackOff", "container killed: out of memory")];
            rc
        };
        let (issues, _) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, None)
            .await;
        assert_eq!(issues[0].category, Category::ResourceIssue);
        assert_eq!(issues[0].title, "Memory Resource Issue");
    }

    #[tokio::test]
    async fn healthy_resource_yields_generic_recommendations() {
        let raw = KubeResource::new(json!({
            "kind": "Pod",
            "metadata": {"name": "web-1"},
            "status": {"phase": "Running"}
        }));
        let rc = pod_context();
        let (issues, recs) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, Some(&raw))
            .await;
        assert!(issues.is_empty());
        assert_eq!(recs, recommend::GENERIC_RECOMMENDATIONS.map(String::from).to_vec());
    }

    #[tokio::test]
    async fn unhealthy_without_specific_findings_is_flagged() {
        let raw = KubeResource::new(json!({
            "kind": "MyCustomThing",
            "metadata": {"name": "thing-1"},
            "status": {"conditions": [{"type": "Failed", "status": "True"}]}
        }));
        let rc = ResourceContext::new("MyCustomThing", "thing-1", "default");
        let (issues, _) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, Some(&raw))
            .await;
        assert_eq!(categories(&issues), vec![Category::UnknownIssue]);
    }

    #[tokio::test]
    async fn classification_is_idempotent() {
        let mut rc = pod_context();
        rc.events = vec![
            warning("Unhealthy", "Readiness probe failed"),
            warning("BackOff", "restarting"),
        ];
        let classifier = Classifier::detached();
        let cancel = CancellationToken::new();
        let (first, _) = classifier.classify(&cancel, &rc, None).await;
        let (second, _) = classifier.classify(&cancel, &rc, None).await;
        assert_eq!(categories(&first), categories(&second));
        let titles: Vec<_> = first.iter().map(|i| i.title.clone()).collect();
        let titles2: Vec<_> = second.iter().map(|i| i.title.clone()).collect();
        assert_eq!(titles, titles2);
    }

    #[tokio::test]
    async fn pvc_checks_fetch_and_soft_fail() {
        let raw = KubeResource::new(json!({
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "default"},
            "spec": {"volumes": [
                {"name": "data", "persistentVolumeClaim": {"claimName": "data-pvc"}},
                {"name": "missing", "persistentVolumeClaim": {"claimName": "ghost-pvc"}}
            ]},
            "status": {"phase": "Running"}
        }));
        let cluster = FakeCluster::new().with_object(
            "PersistentVolumeClaim",
            "default",
            "data-pvc",
            json!({
                "kind": "PersistentVolumeClaim",
                "metadata": {"name": "data-pvc", "namespace": "default"},
                "status": {"phase": "Pending"}
            }),
        );
        let rc = pod_context();
        let classifier = Classifier::new(Arc::new(cluster));
        let (issues, _) = classifier
            .classify(&CancellationToken::new(), &rc, Some(&raw))
            .await;

        let volume_issues: Vec<_> = issues
            .iter()
            .filter(|i| i.category == Category::VolumeIssue)
            .collect();
        assert_eq!(volume_issues.len(), 2);
        assert!(volume_issues.iter().any(|i| i.title == "PVC Not Bound"));
        assert!(volume_issues.iter().any(|i| i.title == "PVC Not Found"));
    }

    #[tokio::test]
    async fn pipeline_failure_severity() {
        let mut rc = pod_context();
        rc.source_project = Some(SourceLink {
            project: Project::default(),
            last_pipeline: Some(Pipeline {
                status: "failed".into(),
                git_ref: "main".into(),
                sha: "abc".into(),
                ..Default::default()
            }),
            last_deployment: Some(opscope_sourcehost::models::Deployment {
                status: "running".into(),
                environment: EnvironmentRef { name: "prod".into() },
                ..Default::default()
            }),
            recent_commits: Vec::new(),
        });
        let (issues, _) = Classifier::detached()
            .classify(&CancellationToken::new(), &rc, None)
            .await;
        assert_eq!(
            categories(&issues),
            vec![Category::PipelineIssue, Category::DeploymentIssue]
        );
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].source, IssueSource::SourceHost);
    }
}
