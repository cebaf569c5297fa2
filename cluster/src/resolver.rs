use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::client::DiscoveredGroup;

/// Time a discovery snapshot stays valid before a lookup forces a refresh.
pub const DISCOVERY_TTL: Duration = Duration::from_secs(600);

/// The group/version/resource tuple the cluster client needs to address a
/// kind, plus its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedKind {
    /// API group; empty for the core group.
    pub group: String,
    pub version: String,
    /// Singular PascalCase kind.
    pub kind: String,
    /// Plural resource name used in API paths.
    pub resource: String,
    pub namespaced: bool,
}

impl ResolvedKind {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Maps user-supplied kinds (case-insensitive, singular or plural) to the
/// tuple the API requires. Well-known kinds resolve from a built-in table;
/// everything else resolves from a cached discovery snapshot.
pub struct Resolver {
    builtin: HashMap<&'static str, ResolvedKind>,
    cache: RwLock<Option<CacheState>>,
    ttl: Duration,
}

struct CacheState {
    by_key: HashMap<String, ResolvedKind>,
    fetched_at: Instant,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::with_ttl(DISCOVERY_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            builtin: builtin_table(),
            cache: RwLock::new(None),
            ttl,
        }
    }

    /// Look a kind up in the built-in table, then in the unexpired
    /// discovery cache. `None` means the caller should refresh discovery
    /// via [`Resolver::fill`] and retry.
    pub fn lookup(&self, kind: &str) -> Option<ResolvedKind> {
        let key = kind.to_ascii_lowercase();
        if let Some(hit) = self.builtin.get(key.as_str()) {
            return Some(hit.clone());
        }
        let cache = self.cache.read().unwrap();
        let state = cache.as_ref()?;
        if state.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        state.by_key.get(&key).cloned()
    }

    /// Replace the discovery cache with a fresh snapshot. Keys are matched
    /// in the order plural resource name, singular name, kind; the first
    /// writer wins so preferred group versions take priority.
    pub fn fill(&self, groups: &[DiscoveredGroup]) {
        let mut by_key: HashMap<String, ResolvedKind> = HashMap::new();
        let entries: Vec<&crate::client::DiscoveredResource> = groups
            .iter()
            .flat_map(|g| g.resources.iter())
            .filter(|r| !r.name.contains('/'))
            .collect();

        let key_fns: [fn(&crate::client::DiscoveredResource) -> String; 3] = [
            |r| r.name.to_ascii_lowercase(),
            |r| r.singular_name.to_ascii_lowercase(),
            |r| r.kind.to_ascii_lowercase(),
        ];
        for key_of in key_fns {
            for r in &entries {
                let key = key_of(r);
                if key.is_empty() {
                    continue;
                }
                by_key.entry(key).or_insert_with(|| ResolvedKind {
                    group: r.group.clone(),
                    version: r.version.clone(),
                    kind: r.kind.clone(),
                    resource: r.name.clone(),
                    namespaced: r.namespaced,
                });
            }
        }

        *self.cache.write().unwrap() = Some(CacheState {
            by_key,
            fetched_at: Instant::now(),
        });
    }
}

fn builtin(group: &str, version: &str, kind: &str, resource: &str, namespaced: bool) -> ResolvedKind {
    ResolvedKind {
        group: group.to_string(),
        version: version.to_string(),
        kind: kind.to_string(),
        resource: resource.to_string(),
        namespaced,
    }
}

fn builtin_table() -> HashMap<&'static str, ResolvedKind> {
    let entries: [(&str, &str, ResolvedKind); 15] = [
        ("pod", "pods", builtin("", "v1", "Pod", "pods", true)),
        ("deployment", "deployments", builtin("apps", "v1", "Deployment", "deployments", true)),
        ("service", "services", builtin("", "v1", "Service", "services", true)),
        ("configmap", "configmaps", builtin("", "v1", "ConfigMap", "configmaps", true)),
        ("secret", "secrets", builtin("", "v1", "Secret", "secrets", true)),
        ("statefulset", "statefulsets", builtin("apps", "v1", "StatefulSet", "statefulsets", true)),
        ("daemonset", "daemonsets", builtin("apps", "v1", "DaemonSet", "daemonsets", true)),
        ("job", "jobs", builtin("batch", "v1", "Job", "jobs", true)),
        ("cronjob", "cronjobs", builtin("batch", "v1", "CronJob", "cronjobs", true)),
        ("ingress", "ingresses", builtin("networking.k8s.io", "v1", "Ingress", "ingresses", true)),
        ("namespace", "namespaces", builtin("", "v1", "Namespace", "namespaces", false)),
        ("node", "nodes", builtin("", "v1", "Node", "nodes", false)),
        ("persistentvolume", "persistentvolumes", builtin("", "v1", "PersistentVolume", "persistentvolumes", false)),
        ("persistentvolumeclaim", "persistentvolumeclaims", builtin("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true)),
        ("event", "events", builtin("", "v1", "Event", "events", true)),
    ];

    let mut table = HashMap::with_capacity(entries.len() * 2);
    for (singular, plural, resolved) in entries {
        table.insert(singular, resolved.clone());
        table.insert(plural, resolved);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DiscoveredGroup, DiscoveredResource};

    fn crd_group() -> Vec<DiscoveredGroup> {
        vec![DiscoveredGroup {
            group_version: "example.io/v1alpha1".into(),
            resources: vec![
                DiscoveredResource {
                    group: "example.io".into(),
                    version: "v1alpha1".into(),
                    name: "mycustomthings".into(),
                    singular_name: "mycustomthing".into(),
                    kind: "MyCustomThing".into(),
                    verbs: vec!["get".into(), "list".into()],
                    namespaced: true,
                },
                DiscoveredResource {
                    group: "example.io".into(),
                    version: "v1alpha1".into(),
                    name: "mycustomthings/status".into(),
                    singular_name: String::new(),
                    kind: "MyCustomThing".into(),
                    verbs: vec!["get".into()],
                    namespaced: true,
                },
            ],
        }]
    }

    #[test]
    fn builtin_kinds_resolve_case_insensitively() {
        let resolver = Resolver::new();
        let a = resolver.lookup("pod").unwrap();
        let b = resolver.lookup("Pod").unwrap();
        let c = resolver.lookup("pods").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.resource, "pods");
        assert!(a.namespaced);
    }

    #[test]
    fn cluster_scoped_builtins() {
        let resolver = Resolver::new();
        assert!(!resolver.lookup("node").unwrap().namespaced);
        assert!(!resolver.lookup("PersistentVolume").unwrap().namespaced);
        assert_eq!(resolver.lookup("ingress").unwrap().group, "networking.k8s.io");
    }

    #[test]
    fn unknown_kind_misses_until_discovery_fill() {
        let resolver = Resolver::new();
        assert!(resolver.lookup("MyCustomThing").is_none());

        resolver.fill(&crd_group());
        let rk = resolver.lookup("mycustomthing").unwrap();
        assert_eq!(rk.resource, "mycustomthings");
        assert_eq!(rk.group_version(), "example.io/v1alpha1");
        assert_eq!(resolver.lookup("MYCUSTOMTHINGS").unwrap(), rk);
    }

    #[test]
    fn subresources_are_skipped() {
        let resolver = Resolver::new();
        resolver.fill(&crd_group());
        let rk = resolver.lookup("mycustomthing").unwrap();
        assert_eq!(rk.resource, "mycustomthings");
    }

    #[test]
    fn expired_cache_misses() {
        let resolver = Resolver::with_ttl(Duration::ZERO);
        resolver.fill(&crd_group());
        assert!(resolver.lookup("mycustomthing").is_none());
        // Built-ins never expire.
        assert!(resolver.lookup("pod").is_some());
    }
}
