use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GitOps application: binds a source-control revision to a set of cluster
/// resources and reports sync and health state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub metadata: AppMetadata,
    #[serde(default)]
    pub spec: AppSpec,
    #[serde(default)]
    pub status: AppStatus,
}

impl Application {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSpec {
    #[serde(default)]
    pub source: AppSource,
    #[serde(default)]
    pub destination: AppDestination,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSource {
    #[serde(default, rename = "repoURL")]
    pub repo_url: String,
    /// Path within the repository; empty means the whole repository.
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "targetRevision")]
    pub target_revision: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDestination {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStatus {
    #[serde(default)]
    pub sync: SyncState,
    #[serde(default)]
    pub health: HealthState,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// `Synced`, `OutOfSync`, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub revision: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthState {
    /// `Healthy`, `Degraded`, `Progressing`, ...
    #[serde(default)]
    pub status: String,
}

/// One deployment record from the application's sync history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "deployedAt")]
    pub deployed_at: Option<DateTime<Utc>>,
}

/// The set of cluster resources an application manages, including
/// ownership-derived descendants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceTree {
    #[serde(default)]
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Wire wrapper for list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationList {
    #[serde(default)]
    pub items: Vec<Application>,
}

#[derive(Debug, Serialize)]
pub struct SessionRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub token: String,
}
