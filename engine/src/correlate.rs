use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use opscope_cluster::client::ClusterClient;
use opscope_cluster::resource::KubeResource;
use opscope_gitops::client::GitOpsClient;
use opscope_gitops::models::{Application, HistoryEntry, ResourceTree};
use opscope_gitops::url::{environment_from_app, extract_project_path};
use opscope_sourcehost::client::SourceHostClient;
use opscope_sourcehost::models::Diff;

use crate::context::{ArgoLink, HISTORY_CAP, ResourceContext, SourceLink};
use crate::helm::{HelmRenderer, RenderedId};

/// Reference to one source-control change.
#[derive(Debug, Clone)]
pub enum ChangeRef {
    Commit(String),
    MergeRequest(i64),
}

impl ChangeRef {
    /// Marker prepended to `related_resources` on every produced context.
    pub fn marker(&self) -> String {
        match self {
            ChangeRef::Commit(sha) => format!("Commit/{sha}"),
            ChangeRef::MergeRequest(iid) => format!("MergeRequest/{iid}"),
        }
    }
}

/// A traced context plus the raw object, when the cluster had it. The raw
/// object feeds the classifier.
#[derive(Debug, Clone, Default)]
pub struct TracedResource {
    pub context: ResourceContext,
    pub raw: Option<KubeResource>,
}

/// Joins cluster, GitOps-controller, and source-host state into
/// [`ResourceContext`] records. Every correlation step is best-effort:
/// failures accumulate in `context.errors` and never abort the pipeline.
pub struct Correlator {
    cluster: Arc<dyn ClusterClient>,
    gitops: Arc<dyn GitOpsClient>,
    sourcehost: Arc<dyn SourceHostClient>,
    helm: HelmRenderer,
}

impl Correlator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        gitops: Arc<dyn GitOpsClient>,
        sourcehost: Arc<dyn SourceHostClient>,
        helm: HelmRenderer,
    ) -> Self {
        Self {
            cluster,
            gitops,
            sourcehost,
            helm,
        }
    }

    /// Assemble the full cross-system context for one resource.
    pub async fn trace_resource(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> TracedResource {
        let mut rc = ResourceContext::new(kind, name, namespace);
        let mut raw = None;

        match self.cluster.resolve(cancel, kind).await {
            Ok(resolved) => match self.cluster.get(cancel, &resolved, namespace, name).await {
                Ok(resource) => {
                    rc.kind = resource.kind().unwrap_or(&resolved.kind).to_string();
                    rc.api_version = resource.api_version().unwrap_or_default().to_string();
                    rc.resource_data = serde_json::to_string_pretty(&resource.0).ok();
                    rc.metadata = extract_metadata(&resource);
                    raw = Some(resource);
                }
                Err(e) => rc
                    .errors
                    .push(format!("kubernetes: failed to get {kind}/{name}: {e}")),
            },
            Err(e) => rc.errors.push(format!("kubernetes: {e}")),
        }

        match self.cluster.events(cancel, namespace, &rc.kind, name).await {
            Ok(events) => rc.events = events,
            Err(e) => rc
                .errors
                .push(format!("kubernetes: failed to list events for {kind}/{name}: {e}")),
        }

        match self.find_managing_app(cancel, &rc.kind, name, namespace).await {
            Ok(Some(app)) => {
                rc.argo = Some(ArgoLink {
                    application: app.name().to_string(),
                    sync_status: app.status.sync.status.clone(),
                    health_status: app.status.health.status.clone(),
                    sync_history: trim_history(app.status.history.clone()),
                });
                let project_path = extract_project_path(&app.spec.source.repo_url);
                if !project_path.is_empty() {
                    rc.source_project = self
                        .link_source(cancel, &project_path, &app, &mut rc.errors)
                        .await;
                }
            }
            Ok(None) => {}
            Err(e) => rc.errors.push(format!("argocd: {e:#}")),
        }

        TracedResource { context: rc, raw }
    }

    /// Find every resource a change could have touched and trace each one.
    pub async fn change_impact(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        change: &ChangeRef,
    ) -> Result<Vec<TracedResource>> {
        let project = self
            .sourcehost
            .get_project(cancel, project_id)
            .await
            .context("failed to fetch project")?;

        let (files, head_ref) = match change {
            ChangeRef::Commit(sha) => {
                self.sourcehost
                    .get_commit(cancel, project_id, sha)
                    .await
                    .with_context(|| format!("failed to fetch commit {sha}"))?;
                let diffs = self
                    .sourcehost
                    .get_commit_diff(cancel, project_id, sha)
                    .await
                    .with_context(|| format!("failed to fetch diff for commit {sha}"))?;
                (changed_paths(&diffs), sha.clone())
            }
            ChangeRef::MergeRequest(iid) => {
                let mr = self
                    .sourcehost
                    .get_merge_request_changes(cancel, project_id, *iid)
                    .await
                    .with_context(|| format!("failed to fetch merge request {iid}"))?;
                let head = if mr.sha.is_empty() {
                    mr.source_branch.clone()
                } else {
                    mr.sha.clone()
                };
                (changed_paths(&mr.changes), head)
            }
        };

        let applications = self
            .gitops
            .list_applications(cancel)
            .await
            .context("failed to list applications")?;
        let mut affected = Vec::new();
        let mut unmatched = Vec::new();
        for app in applications {
            if extract_project_path(&app.spec.source.repo_url) != project.path_with_namespace {
                continue;
            }
            if path_overlaps(&app.spec.source.path, &files) {
                affected.push(app);
            } else {
                unmatched.push(app);
            }
        }

        // Merge requests additionally go through chart rendering: an
        // application is affected if its resource tree contains anything
        // the changed charts render.
        if matches!(change, ChangeRef::MergeRequest(_)) {
            let rendered = self
                .helm
                .chart_impact(cancel, self.sourcehost.as_ref(), project_id, &head_ref, &files)
                .await;
            if !rendered.is_empty() {
                for app in unmatched {
                    match self.gitops.resource_tree(cancel, app.name()).await {
                        Ok(tree) => {
                            if tree_contains_any(&tree, &rendered) {
                                affected.push(app);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(app = %app.name(), error = %e, "resource tree fetch failed");
                        }
                    }
                }
            }
        }

        let marker = change.marker();
        let mut traced = Vec::new();
        let mut seen = HashSet::new();
        for app in &affected {
            let tree = match self.gitops.resource_tree(cancel, app.name()).await {
                Ok(tree) => tree,
                Err(e) => {
                    tracing::warn!(app = %app.name(), error = %e, "resource tree fetch failed");
                    continue;
                }
            };
            for node in &tree.nodes {
                if node.kind.is_empty() || node.name.is_empty() {
                    continue;
                }
                let key = (
                    node.kind.to_ascii_lowercase(),
                    node.name.clone(),
                    node.namespace.clone(),
                );
                if !seen.insert(key) {
                    continue;
                }
                let mut result = self
                    .trace_resource(cancel, &node.kind, &node.name, &node.namespace)
                    .await;
                result.context.related_resources.insert(0, marker.clone());
                traced.push(result);
            }
        }
        Ok(traced)
    }

    async fn find_managing_app(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Application>> {
        match self
            .gitops
            .applications_by_resource(cancel, kind, name, namespace)
            .await
        {
            Ok(apps) if !apps.is_empty() => return Ok(apps.into_iter().next()),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %format!("{e:#}"), "native resource lookup unavailable, scanning resource trees");
            }
        }

        let applications = self.gitops.list_applications(cancel).await?;
        for app in applications {
            match self.gitops.resource_tree(cancel, app.name()).await {
                Ok(tree) => {
                    let matched = tree.nodes.iter().any(|node| {
                        node.kind.eq_ignore_ascii_case(kind)
                            && node.name == name
                            && (node.namespace == namespace || node.namespace.is_empty())
                    });
                    if matched {
                        return Ok(Some(app));
                    }
                }
                Err(e) => {
                    tracing::warn!(app = %app.name(), error = %e, "resource tree fetch failed");
                }
            }
        }
        Ok(None)
    }

    async fn link_source(
        &self,
        cancel: &CancellationToken,
        project_path: &str,
        app: &Application,
        errors: &mut Vec<String>,
    ) -> Option<SourceLink> {
        let project = match self.sourcehost.get_project_by_path(cancel, project_path).await {
            Ok(project) => project,
            Err(e) => {
                errors.push(format!("gitlab: failed to fetch project {project_path}: {e:#}"));
                return None;
            }
        };
        let project_id = project.id;
        let mut link = SourceLink {
            project,
            last_pipeline: None,
            last_deployment: None,
            recent_commits: Vec::new(),
        };

        match self.sourcehost.list_pipelines(cancel, project_id).await {
            Ok(pipelines) => link.last_pipeline = pipelines.into_iter().next(),
            Err(e) => errors.push(format!("gitlab: failed to list pipelines: {e:#}")),
        }

        let environment = environment_from_app(app);
        match self
            .sourcehost
            .recent_deployments(cancel, project_id, &environment)
            .await
        {
            Ok(deployments) => link.last_deployment = deployments.into_iter().next(),
            Err(e) => errors.push(format!("gitlab: failed to list deployments: {e:#}")),
        }

        let since = Utc::now() - Duration::hours(24);
        match self.sourcehost.recent_commits(cancel, project_id, since).await {
            Ok(commits) => {
                link.recent_commits = commits.into_iter().take(HISTORY_CAP).collect();
            }
            Err(e) => errors.push(format!("gitlab: failed to list recent commits: {e:#}")),
        }

        Some(link)
    }
}

/// Newest-first sync history capped at [`HISTORY_CAP`]. Controllers report
/// history oldest-first.
fn trim_history(mut history: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    history.sort_by(|a, b| b.id.cmp(&a.id).then_with(|| b.deployed_at.cmp(&a.deployed_at)));
    history.truncate(HISTORY_CAP);
    history
}

fn changed_paths(diffs: &[Diff]) -> Vec<String> {
    let mut files = Vec::new();
    for diff in diffs {
        if !diff.new_path.is_empty() && !files.contains(&diff.new_path) {
            files.push(diff.new_path.clone());
        }
        if !diff.old_path.is_empty()
            && diff.old_path != diff.new_path
            && !files.contains(&diff.old_path)
        {
            files.push(diff.old_path.clone());
        }
    }
    files
}

/// An application is affected iff any changed file sits at or under its
/// source path. An empty source path matches everything.
fn path_overlaps(source_path: &str, files: &[String]) -> bool {
    if source_path.is_empty() {
        return true;
    }
    let prefix = source_path.trim_end_matches('/');
    files
        .iter()
        .any(|file| file == prefix || file.starts_with(&format!("{prefix}/")))
}

fn tree_contains_any(tree: &ResourceTree, ids: &[RenderedId]) -> bool {
    tree.nodes.iter().any(|node| {
        ids.iter().any(|id| {
            id.kind.eq_ignore_ascii_case(&node.kind)
                && id.name == node.name
                && id
                    .namespace
                    .as_deref()
                    .map(|ns| ns == node.namespace)
                    .unwrap_or(true)
        })
    })
}

/// Per-kind derived metadata: replica math for workloads, container
/// summaries for anything with a pod template or pod spec.
fn extract_metadata(resource: &KubeResource) -> Map<String, Value> {
    let mut metadata = Map::new();
    let kind = resource.kind().unwrap_or_default().to_ascii_lowercase();
    match kind.as_str() {
        "deployment" | "statefulset" | "daemonset" | "replicaset" => {
            if let Some(desired) = resource.nested_i64(&["spec", "replicas"]) {
                metadata.insert("desiredReplicas".into(), json!(desired));
            }
            for (path, key) in [
                (["status", "replicas"], "currentReplicas"),
                (["status", "readyReplicas"], "readyReplicas"),
                (["status", "availableReplicas"], "availableReplicas"),
                (["status", "updatedReplicas"], "updatedReplicas"),
            ] {
                if let Some(count) = resource.nested_i64(&path) {
                    metadata.insert(key.into(), json!(count));
                }
            }
            if let Some(containers) =
                resource.nested_slice(&["spec", "template", "spec", "containers"])
            {
                metadata.insert("containers".into(), container_summaries(containers));
            }
        }
        "pod" => {
            if let Some(phase) = resource.nested_str(&["status", "phase"]) {
                metadata.insert("phase".into(), json!(phase));
            }
            if let Some(node) = resource.nested_str(&["spec", "nodeName"]) {
                metadata.insert("node".into(), json!(node));
            }
            if let Some(containers) = resource.nested_slice(&["spec", "containers"]) {
                metadata.insert("containers".into(), container_summaries(containers));
            }
        }
        _ => {}
    }
    metadata
}

fn container_summaries(containers: &[Value]) -> Value {
    let summaries: Vec<Value> = containers
        .iter()
        .map(|container| {
            json!({
                "name": container.get("name").and_then(Value::as_str).unwrap_or(""),
                "image": container.get("image").and_then(Value::as_str).unwrap_or(""),
                "requests": container
                    .get("resources")
                    .and_then(|r| r.get("requests"))
                    .cloned()
                    .unwrap_or(Value::Null),
                "limits": container
                    .get("resources")
                    .and_then(|r| r.get("limits"))
                    .cloned()
                    .unwrap_or(Value::Null),
            })
        })
        .collect();
    Value::Array(summaries)
}
