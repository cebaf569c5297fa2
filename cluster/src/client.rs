use std::future::Future;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event as CoreEvent, Namespace};
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Scope, verbs};
use kube::{Client, Discovery};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::resolver::{ResolvedKind, Resolver};
use crate::resource::{Event, KubeResource, ObjectRef, dedupe_events, sort_events_desc};

/// One resource type as reported by API discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    /// Plural resource name used in API paths.
    pub name: String,
    pub singular_name: String,
    pub kind: String,
    pub verbs: Vec<String>,
    pub namespaced: bool,
}

impl DiscoveredResource {
    /// Whether the topology mapper may list this type: it must support the
    /// list verb and not be a subresource.
    pub fn listable(&self) -> bool {
        !self.name.contains('/') && self.verbs.iter().any(|v| v == verbs::LIST)
    }
}

/// One API group/version with its preferred resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredGroup {
    pub group_version: String,
    pub resources: Vec<DiscoveredResource>,
}

/// Capability interface over the cluster API. The engine only reads.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Resolve a user-supplied kind (case-insensitive, singular or plural)
    /// to the tuple the API requires, refreshing discovery on a miss.
    async fn resolve(&self, cancel: &CancellationToken, kind: &str) -> Result<ResolvedKind, Error>;

    /// Full preferred-resource catalog.
    async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<DiscoveredGroup>, Error>;

    async fn get(
        &self,
        cancel: &CancellationToken,
        kind: &ResolvedKind,
        namespace: &str,
        name: &str,
    ) -> Result<KubeResource, Error>;

    async fn list(
        &self,
        cancel: &CancellationToken,
        kind: &ResolvedKind,
        namespace: &str,
    ) -> Result<Vec<KubeResource>, Error>;

    /// Events concerning one object, deduplicated and most-recent-first.
    /// An empty `namespace` searches across namespaces.
    async fn events(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Vec<Event>, Error>;

    async fn namespaces(&self, cancel: &CancellationToken) -> Result<Vec<String>, Error>;
}

/// Production implementation over a `kube::Client` using the dynamic API.
pub struct KubeClusterClient {
    client: Client,
    resolver: Resolver,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolver: Resolver::new(),
        }
    }

    /// Build from the ambient kubeconfig / in-cluster environment.
    pub async fn from_env() -> Result<Self, Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api_for(&self, kind: &ResolvedKind, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &kind.resource);
        if kind.namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

/// Race one upstream call against the request's cancellation token.
async fn race<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, kube::Error>>,
) -> Result<T, Error> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = call => res.map_err(Error::from),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn resolve(&self, cancel: &CancellationToken, kind: &str) -> Result<ResolvedKind, Error> {
        if kind.trim().is_empty() {
            return Err(Error::UserInput("resource kind must not be empty".into()));
        }
        if let Some(resolved) = self.resolver.lookup(kind) {
            return Ok(resolved);
        }
        let groups = self.discover(cancel).await?;
        self.resolver.fill(&groups);
        self.resolver
            .lookup(kind)
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<DiscoveredGroup>, Error> {
        let discovery = race(cancel, Discovery::new(self.client.clone()).run()).await?;

        let mut groups = Vec::new();
        for group in discovery.groups() {
            let version = group.preferred_version_or_latest();
            let group_version = if group.name().is_empty() {
                version.to_string()
            } else {
                format!("{}/{}", group.name(), version)
            };
            let resources = group
                .recommended_resources()
                .into_iter()
                .map(|(ar, caps)| DiscoveredResource {
                    singular_name: ar.kind.to_ascii_lowercase(),
                    group: ar.group,
                    version: ar.version,
                    name: ar.plural,
                    kind: ar.kind,
                    verbs: caps.operations,
                    namespaced: caps.scope == Scope::Namespaced,
                })
                .collect();
            groups.push(DiscoveredGroup {
                group_version,
                resources,
            });
        }
        Ok(groups)
    }

    async fn get(
        &self,
        cancel: &CancellationToken,
        kind: &ResolvedKind,
        namespace: &str,
        name: &str,
    ) -> Result<KubeResource, Error> {
        let api = self.api_for(kind, namespace);
        let object = race(cancel, api.get(name)).await?;
        Ok(KubeResource::new(serde_json::to_value(&object)?))
    }

    async fn list(
        &self,
        cancel: &CancellationToken,
        kind: &ResolvedKind,
        namespace: &str,
    ) -> Result<Vec<KubeResource>, Error> {
        let api = self.api_for(kind, namespace);
        let list = race(cancel, api.list(&ListParams::default())).await?;
        list.items
            .into_iter()
            .map(|object| Ok(KubeResource::new(serde_json::to_value(&object)?)))
            .collect()
    }

    async fn events(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<Vec<Event>, Error> {
        let api: Api<CoreEvent> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let params = ListParams::default()
            .fields(&format!("involvedObject.kind={kind},involvedObject.name={name}"));
        let list = race(cancel, api.list(&params)).await?;

        let mut events = dedupe_events(list.items.into_iter().map(convert_event).collect());
        sort_events_desc(&mut events);
        Ok(events)
    }

    async fn namespaces(&self, cancel: &CancellationToken) -> Result<Vec<String>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = race(cancel, api.list(&ListParams::default())).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}

fn jiff_timestamp_to_chrono(t: k8s_openapi::jiff::Timestamp) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(t.as_second(), t.subsec_nanosecond() as u32)
        .unwrap_or_default()
}

fn convert_event(event: CoreEvent) -> Event {
    Event {
        reason: event.reason.unwrap_or_default(),
        message: event.message.unwrap_or_default(),
        event_type: event.type_.unwrap_or_else(|| "Normal".to_string()),
        count: event.count.unwrap_or(1),
        first_time: event.first_timestamp.map(|t| jiff_timestamp_to_chrono(t.0)),
        last_time: event.last_timestamp.map(|t| jiff_timestamp_to_chrono(t.0)),
        object: ObjectRef {
            kind: event.involved_object.kind.unwrap_or_default(),
            name: event.involved_object.name.unwrap_or_default(),
            namespace: event.involved_object.namespace.unwrap_or_default(),
        },
    }
}
