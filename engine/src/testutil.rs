//! In-test fake implementations of the upstream capabilities.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use opscope_cluster::client::{ClusterClient, DiscoveredGroup, DiscoveredResource};
use opscope_cluster::error::Error as ClusterError;
use opscope_cluster::resolver::{ResolvedKind, Resolver};
use opscope_cluster::resource::{Event, KubeResource};
use opscope_gitops::client::GitOpsClient;
use opscope_gitops::models::{
    AppDestination, AppMetadata, AppSource, AppSpec, Application, HistoryEntry, ResourceTree,
    TreeNode,
};
use opscope_sourcehost::client::SourceHostClient;
use opscope_sourcehost::models::{
    Commit, Deployment, Diff, EnvironmentRef, FlexTime, MergeRequest, Pipeline, Project,
};

use crate::assemble::CompletionProvider;

#[derive(Default)]
pub struct FakeCluster {
    resolver: Resolver,
    objects: HashMap<(String, String, String), KubeResource>,
    events: HashMap<(String, String), Vec<Event>>,
    lists: HashMap<String, Vec<KubeResource>>,
    groups: Vec<DiscoveredGroup>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, kind: &str, namespace: &str, name: &str, value: Value) -> Self {
        self.objects.insert(
            (kind.to_ascii_lowercase(), namespace.to_string(), name.to_string()),
            KubeResource::new(value),
        );
        self
    }

    pub fn with_events(mut self, kind: &str, name: &str, events: Vec<Event>) -> Self {
        self.events
            .insert((kind.to_ascii_lowercase(), name.to_string()), events);
        self
    }

    /// Register a listable namespaced type plus its objects for topology
    /// sweeps.
    pub fn with_listing(mut self, kind: &str, plural: &str, objects: Vec<Value>) -> Self {
        let resource = DiscoveredResource {
            group: String::new(),
            version: "v1".into(),
            name: plural.into(),
            singular_name: kind.to_ascii_lowercase(),
            kind: kind.into(),
            verbs: vec!["get".into(), "list".into()],
            namespaced: true,
        };
        match self.groups.first_mut() {
            Some(group) => group.resources.push(resource),
            None => self.groups.push(DiscoveredGroup {
                group_version: "v1".into(),
                resources: vec![resource],
            }),
        }
        self.lists.insert(
            kind.to_string(),
            objects.into_iter().map(KubeResource::new).collect(),
        );
        self
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn resolve(
        &self,
        _cancel: &CancellationToken,
        kind: &str,
    ) -> Result<ResolvedKind, ClusterError> {
        self.resolver
            .lookup(kind)
            .ok_or_else(|| ClusterError::UnknownKind(kind.to_string()))
    }

    async fn discover(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredGroup>, ClusterError> {
        Ok(self.groups.clone())
    }

    async fn get(
        &self,
        _cancel: &CancellationToken,
        kind: &ResolvedKind,
        namespace: &str,
        name: &str,
    ) -> Result<KubeResource, ClusterError> {
        self.objects
            .get(&(kind.kind.to_ascii_lowercase(), namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                ClusterError::UserInput(format!("{} {namespace}/{name} not found", kind.kind))
            })
    }

    async fn list(
        &self,
        _cancel: &CancellationToken,
        kind: &ResolvedKind,
        _namespace: &str,
    ) -> Result<Vec<KubeResource>, ClusterError> {
        Ok(self.lists.get(&kind.kind).cloned().unwrap_or_default())
    }

    async fn events(
        &self,
        _cancel: &CancellationToken,
        _namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Vec<Event>, ClusterError> {
        Ok(self
            .events
            .get(&(kind.to_ascii_lowercase(), name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn namespaces(&self, _cancel: &CancellationToken) -> Result<Vec<String>, ClusterError> {
        Ok(vec!["default".into()])
    }
}

#[derive(Default)]
pub struct FakeGitOps {
    apps: Vec<Application>,
    trees: HashMap<String, ResourceTree>,
    by_resource: HashMap<(String, String, String), Vec<Application>>,
    fail_list: bool,
}

impl FakeGitOps {
    pub fn with_app(mut self, app: Application, tree: ResourceTree) -> Self {
        self.trees.insert(app.metadata.name.clone(), tree);
        self.apps.push(app);
        self
    }

    pub fn with_list_failure(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn with_resource_lookup(
        mut self,
        kind: &str,
        name: &str,
        namespace: &str,
        apps: Vec<Application>,
    ) -> Self {
        self.by_resource.insert(
            (kind.to_ascii_lowercase(), name.to_string(), namespace.to_string()),
            apps,
        );
        self
    }
}

#[async_trait]
impl GitOpsClient for FakeGitOps {
    async fn list_applications(&self, _cancel: &CancellationToken) -> Result<Vec<Application>> {
        if self.fail_list {
            bail!("gitops controller unreachable");
        }
        Ok(self.apps.clone())
    }

    async fn get_application(
        &self,
        _cancel: &CancellationToken,
        name: &str,
    ) -> Result<Application> {
        self.apps
            .iter()
            .find(|app| app.metadata.name == name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("application {name} not found"))
    }

    async fn resource_tree(
        &self,
        _cancel: &CancellationToken,
        name: &str,
    ) -> Result<ResourceTree> {
        self.trees
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no resource tree for {name}"))
    }

    async fn applications_by_resource(
        &self,
        _cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<Application>> {
        match self.by_resource.get(&(
            kind.to_ascii_lowercase(),
            name.to_string(),
            namespace.to_string(),
        )) {
            Some(apps) => Ok(apps.clone()),
            None => bail!("resource lookup unsupported"),
        }
    }

    async fn application_history(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Vec<HistoryEntry>> {
        Ok(self.get_application(cancel, name).await?.status.history)
    }
}

pub fn app_with_source(name: &str, repo_url: &str, path: &str, namespace: &str) -> Application {
    Application {
        metadata: AppMetadata {
            name: name.into(),
            labels: HashMap::new(),
        },
        spec: AppSpec {
            source: AppSource {
                repo_url: repo_url.into(),
                path: path.into(),
                target_revision: "HEAD".into(),
            },
            destination: AppDestination {
                server: String::new(),
                namespace: namespace.into(),
            },
        },
        status: Default::default(),
    }
}

pub fn tree(nodes: &[(&str, &str, &str)]) -> ResourceTree {
    ResourceTree {
        nodes: nodes
            .iter()
            .map(|(kind, name, namespace)| TreeNode {
                group: String::new(),
                version: "v1".into(),
                kind: (*kind).to_string(),
                name: (*name).to_string(),
                namespace: (*namespace).to_string(),
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct FakeSourceHost {
    projects: HashMap<String, Project>,
    pipelines: Vec<Pipeline>,
    deployments: Vec<Deployment>,
    commits: Vec<Commit>,
    commit_diffs: HashMap<String, Vec<Diff>>,
    merge_requests: HashMap<i64, MergeRequest>,
    files: HashMap<(String, String), String>,
}

impl FakeSourceHost {
    pub fn with_project(mut self, path: &str, id: i64) -> Self {
        self.projects.insert(
            path.to_string(),
            Project {
                id,
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path_with_namespace: path.to_string(),
                web_url: format!("https://gitlab.example.com/{path}"),
                default_branch: "main".into(),
            },
        );
        self
    }

    pub fn with_pipeline(mut self, status: &str, git_ref: &str) -> Self {
        self.pipelines.push(Pipeline {
            id: self.pipelines.len() as i64 + 1,
            status: status.into(),
            git_ref: git_ref.into(),
            sha: "abc123".into(),
            web_url: String::new(),
            created_at: FlexTime::Int(1735689600),
        });
        self
    }

    pub fn with_deployment(mut self, status: &str, environment: &str) -> Self {
        self.deployments.push(Deployment {
            id: self.deployments.len() as i64 + 1,
            status: status.into(),
            git_ref: "main".into(),
            sha: "abc123".into(),
            environment: EnvironmentRef {
                name: environment.into(),
            },
            created_at: FlexTime::Int(1735689600),
        });
        self
    }

    pub fn with_commits(mut self, count: usize) -> Self {
        for index in 0..count {
            self.commits.push(Commit {
                id: format!("sha-{index}"),
                short_id: format!("sha-{index}"),
                title: format!("commit {index}"),
                message: String::new(),
                author_name: "dev".into(),
                created_at: FlexTime::Int(1735689600 - index as i64 * 60),
            });
        }
        self
    }

    pub fn with_commit_diff(mut self, sha: &str, files: &[&str]) -> Self {
        self.commit_diffs.insert(
            sha.to_string(),
            files
                .iter()
                .map(|file| Diff {
                    new_path: (*file).to_string(),
                    ..Default::default()
                })
                .collect(),
        );
        self
    }

    pub fn with_merge_request(mut self, iid: i64, sha: &str, files: &[&str]) -> Self {
        self.merge_requests.insert(
            iid,
            MergeRequest {
                iid,
                title: format!("mr {iid}"),
                state: "opened".into(),
                sha: sha.into(),
                source_branch: "feature".into(),
                target_branch: "main".into(),
                changes: files
                    .iter()
                    .map(|file| Diff {
                        new_path: (*file).to_string(),
                        ..Default::default()
                    })
                    .collect(),
            },
        );
        self
    }

    pub fn with_file(mut self, path: &str, git_ref: &str, content: &str) -> Self {
        self.files
            .insert((path.to_string(), git_ref.to_string()), content.to_string());
        self
    }
}

#[async_trait]
impl SourceHostClient for FakeSourceHost {
    async fn get_project(&self, _cancel: &CancellationToken, id: i64) -> Result<Project> {
        self.projects
            .values()
            .find(|project| project.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("project {id} not found"))
    }

    async fn get_project_by_path(
        &self,
        _cancel: &CancellationToken,
        path: &str,
    ) -> Result<Project> {
        self.projects
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("project {path} not found"))
    }

    async fn get_commit(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        sha: &str,
    ) -> Result<Commit> {
        if self.commit_diffs.contains_key(sha) {
            Ok(Commit {
                id: sha.to_string(),
                short_id: sha.chars().take(8).collect(),
                ..Default::default()
            })
        } else {
            bail!("commit {sha} not found")
        }
    }

    async fn get_commit_diff(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        sha: &str,
    ) -> Result<Vec<Diff>> {
        self.commit_diffs
            .get(sha)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("diff for {sha} not found"))
    }

    async fn list_pipelines(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
    ) -> Result<Vec<Pipeline>> {
        Ok(self.pipelines.clone())
    }

    async fn recent_deployments(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        _environment: &str,
    ) -> Result<Vec<Deployment>> {
        Ok(self.deployments.clone())
    }

    async fn recent_commits(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Commit>> {
        Ok(self.commits.clone())
    }

    async fn get_merge_request_changes(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        iid: i64,
    ) -> Result<MergeRequest> {
        self.merge_requests
            .get(&iid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("merge request {iid} not found"))
    }

    async fn get_merge_request_commits(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        _iid: i64,
    ) -> Result<Vec<Commit>> {
        Ok(Vec::new())
    }

    async fn get_file_content(
        &self,
        _cancel: &CancellationToken,
        _project_id: i64,
        path: &str,
        git_ref: &str,
    ) -> Result<String> {
        self.files
            .get(&(path.to_string(), git_ref.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("file {path} not found at {git_ref}"))
    }
}

pub struct FakeProvider {
    pub reply: String,
    pub fail: bool,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeProvider {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: String::new(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if self.fail {
            bail!("completion backend unavailable");
        }
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        Ok(self.reply.clone())
    }
}
