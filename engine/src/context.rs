use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use opscope_cluster::resource::Event;
use opscope_cluster::topology::NamespaceTopology;
use opscope_gitops::models::HistoryEntry;
use opscope_sourcehost::models::{Commit, Deployment, Pipeline, Project};

/// Caps applied to history-shaped collections carried in a context.
pub const HISTORY_CAP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

/// Which upstream system an issue was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueSource {
    Kubernetes,
    GitOps,
    SourceHost,
}

/// Closed set of issue categories; the recommendation table is keyed on
/// these. Categories without a dedicated table entry fall back to the
/// generic log/event advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    ImagePullError,
    HealthCheckFailure,
    ResourceIssue,
    CrashLoopBackOff,
    SyncIssue,
    SyncFailure,
    PipelineIssue,
    DeploymentIssue,
    PodNotRunning,
    PodFailed,
    PodPending,
    PodNotReady,
    PodInitializing,
    InitializationIssue,
    ContainerReadinessIssue,
    VolumeIssue,
    SchedulingIssue,
    DeploymentNotAvailable,
    DeploymentNotReady,
    DeploymentNotProgressing,
    ContainerWaiting,
    ContainerTerminated,
    FrequentRestarts,
    HealthIssue,
    UnknownIssue,
    OtherWarning,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ImagePullError => "ImagePullError",
            Category::HealthCheckFailure => "HealthCheckFailure",
            Category::ResourceIssue => "ResourceIssue",
            Category::CrashLoopBackOff => "CrashLoopBackOff",
            Category::SyncIssue => "SyncIssue",
            Category::SyncFailure => "SyncFailure",
            Category::PipelineIssue => "PipelineIssue",
            Category::DeploymentIssue => "DeploymentIssue",
            Category::PodNotRunning => "PodNotRunning",
            Category::PodFailed => "PodFailed",
            Category::PodPending => "PodPending",
            Category::PodNotReady => "PodNotReady",
            Category::PodInitializing => "PodInitializing",
            Category::InitializationIssue => "InitializationIssue",
            Category::ContainerReadinessIssue => "ContainerReadinessIssue",
            Category::VolumeIssue => "VolumeIssue",
            Category::SchedulingIssue => "SchedulingIssue",
            Category::DeploymentNotAvailable => "DeploymentNotAvailable",
            Category::DeploymentNotReady => "DeploymentNotReady",
            Category::DeploymentNotProgressing => "DeploymentNotProgressing",
            Category::ContainerWaiting => "ContainerWaiting",
            Category::ContainerTerminated => "ContainerTerminated",
            Category::FrequentRestarts => "FrequentRestarts",
            Category::HealthIssue => "HealthIssue",
            Category::UnknownIssue => "UnknownIssue",
            Category::OtherWarning => "OtherWarning",
        }
    }
}

/// One classified problem on a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,
    pub category: Category,
    pub severity: Severity,
    pub source: IssueSource,
    pub description: String,
}

/// Link to the GitOps application managing a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgoLink {
    pub application: String,
    pub sync_status: String,
    pub health_status: String,
    /// Newest first, capped at [`HISTORY_CAP`].
    #[serde(default)]
    pub sync_history: Vec<HistoryEntry>,
}

/// Link to the source-control project the resource was deployed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceLink {
    pub project: Project,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pipeline: Option<Pipeline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployment: Option<Deployment>,
    /// Newest first, capped at [`HISTORY_CAP`].
    #[serde(default)]
    pub recent_commits: Vec<Commit>,
}

/// The join record: everything the engine learned about one resource
/// across the cluster, the GitOps controller, and the source host.
/// Collection failures accumulate in `errors` instead of aborting, so the
/// model can see which inputs were unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceContext {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub api_version: String,

    /// Raw object JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_data: Option<String>,

    /// Derived per-kind metadata (replica counts, container summaries).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argo: Option<ArgoLink>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_project: Option<SourceLink>,

    /// Namespace snapshot, populated for namespace analyses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<NamespaceTopology>,

    #[serde(default)]
    pub events: Vec<Event>,

    /// `Kind/Name` or `Namespace/Kind/Name` entries.
    #[serde(default)]
    pub related_resources: Vec<String>,

    /// Non-fatal collection failures, one human-readable string per system.
    #[serde(default)]
    pub errors: Vec<String>,

    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl ResourceContext {
    pub fn new(kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }
}
