use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::client::ClusterClient;
use crate::error::Error;
use crate::health::{self, HealthStatus};
use crate::relations::{self, Relationship};
use crate::resolver::ResolvedKind;
use crate::resource::KubeResource;

/// Cap on concurrent list calls during the namespace sweep. Discovery
/// catalogs can be large; unbounded fan-out would hammer the API server.
const MAX_LIST_WORKERS: usize = 16;

/// Snapshot of one namespace: what exists, how healthy it is, and how the
/// pieces relate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceTopology {
    pub namespace: String,
    /// kind -> resource names, mirroring upstream list order per kind.
    pub resources: HashMap<String, Vec<String>>,
    /// kind -> name -> health.
    pub health: HashMap<String, HashMap<String, HealthStatus>>,
    pub relationships: Vec<Relationship>,
}

impl NamespaceTopology {
    pub fn total_resources(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    pub fn count_with_status(&self, status: HealthStatus) -> usize {
        self.health
            .values()
            .flat_map(|per_kind| per_kind.values())
            .filter(|s| **s == status)
            .count()
    }
}

/// List every namespaced resource type in `namespace` concurrently,
/// classify health, and infer relationships.
///
/// Individual list failures are logged and skipped; the operation as a
/// whole succeeds iff discovery succeeded and the request was not
/// cancelled.
pub async fn map_namespace(
    client: Arc<dyn ClusterClient>,
    cancel: &CancellationToken,
    namespace: &str,
) -> Result<NamespaceTopology, Error> {
    let groups = client.discover(cancel).await?;

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for group in &groups {
        for resource in &group.resources {
            if !resource.namespaced || !resource.listable() {
                continue;
            }
            if !seen.insert((resource.group.clone(), resource.name.clone())) {
                continue;
            }
            targets.push(ResolvedKind {
                group: resource.group.clone(),
                version: resource.version.clone(),
                kind: resource.kind.clone(),
                resource: resource.name.clone(),
                namespaced: true,
            });
        }
    }

    let semaphore = Arc::new(Semaphore::new(MAX_LIST_WORKERS));
    let merged: Arc<Mutex<HashMap<String, Vec<KubeResource>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut tasks = Vec::with_capacity(targets.len());

    for target in targets {
        let client = client.clone();
        let cancel = cancel.clone();
        let semaphore = semaphore.clone();
        let merged = merged.clone();
        let namespace = namespace.to_string();
        tasks.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            match client.list(&cancel, &target, &namespace).await {
                Ok(items) if !items.is_empty() => {
                    let mut merged = merged.lock().unwrap();
                    merged.entry(target.kind.clone()).or_default().extend(items);
                }
                Ok(_) => {}
                Err(Error::Cancelled) => {}
                Err(e) => {
                    tracing::warn!(
                        kind = %target.kind,
                        namespace = %namespace,
                        error = %e,
                        "listing resource type failed"
                    );
                }
            }
        }));
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "topology list task panicked");
        }
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let by_kind = match Arc::try_unwrap(merged) {
        Ok(mutex) => mutex.into_inner().unwrap(),
        Err(arc) => arc.lock().unwrap().clone(),
    };

    let mut topology = NamespaceTopology {
        namespace: namespace.to_string(),
        ..Default::default()
    };
    for (kind, items) in &by_kind {
        let mut names: Vec<String> = Vec::with_capacity(items.len());
        let mut statuses = HashMap::with_capacity(items.len());
        for item in items {
            let Some(name) = item.name() else { continue };
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
            statuses.insert(name.to_string(), health::classify(item));
        }
        topology.resources.insert(kind.clone(), names);
        topology.health.insert(kind.clone(), statuses);
    }
    topology.relationships = relations::infer(namespace, &by_kind);

    Ok(topology)
}
