use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque cluster object. CRDs make any static model incomplete, so the
/// engine reads objects only through these accessors; a missing path is
/// `None`, never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubeResource(pub Value);

/// Owner reference extracted from `metadata.ownerReferences`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub controller: bool,
}

impl KubeResource {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn kind(&self) -> Option<&str> {
        self.nested_str(&["kind"])
    }

    pub fn api_version(&self) -> Option<&str> {
        self.nested_str(&["apiVersion"])
    }

    pub fn name(&self) -> Option<&str> {
        self.nested_str(&["metadata", "name"])
    }

    pub fn namespace(&self) -> Option<&str> {
        self.nested_str(&["metadata", "namespace"])
    }

    pub fn labels(&self) -> Option<&Map<String, Value>> {
        self.nested_map(&["metadata", "labels"])
    }

    pub fn annotations(&self) -> Option<&Map<String, Value>> {
        self.nested_map(&["metadata", "annotations"])
    }

    pub fn owner_refs(&self) -> Vec<OwnerRef> {
        let Some(refs) = self.nested_slice(&["metadata", "ownerReferences"]) else {
            return Vec::new();
        };
        refs.iter()
            .filter_map(|r| {
                Some(OwnerRef {
                    kind: r.get("kind")?.as_str()?.to_string(),
                    name: r.get("name")?.as_str()?.to_string(),
                    controller: r.get("controller").and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect()
    }

    pub fn nested(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.0;
        for key in path {
            current = current.get(key)?;
        }
        Some(current)
    }

    pub fn nested_str(&self, path: &[&str]) -> Option<&str> {
        self.nested(path)?.as_str()
    }

    pub fn nested_i64(&self, path: &[&str]) -> Option<i64> {
        self.nested(path)?.as_i64()
    }

    pub fn nested_bool(&self, path: &[&str]) -> Option<bool> {
        self.nested(path)?.as_bool()
    }

    pub fn nested_slice(&self, path: &[&str]) -> Option<&Vec<Value>> {
        self.nested(path)?.as_array()
    }

    pub fn nested_map(&self, path: &[&str]) -> Option<&Map<String, Value>> {
        self.nested(path)?.as_object()
    }
}

/// Reference to the object an event concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// Cluster event, normalised from the core/v1 shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    pub reason: String,
    pub message: String,
    /// `Normal` or `Warning`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub count: i32,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub object: ObjectRef,
}

impl Event {
    pub fn is_warning(&self) -> bool {
        self.event_type == "Warning"
    }
}

/// Sort most-recent-first by last seen time, falling back to first seen.
pub fn sort_events_desc(events: &mut [Event]) {
    events.sort_by(|a, b| {
        let ta = a.last_time.or(a.first_time);
        let tb = b.last_time.or(b.first_time);
        tb.cmp(&ta)
    });
}

/// Collapse duplicate event series reported by the upstream: identical
/// (reason, message) pairs merge into one entry with summed counts and the
/// widest time window.
pub fn dedupe_events(events: Vec<Event>) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if let Some(existing) = out
            .iter_mut()
            .find(|e| e.reason == event.reason && e.message == event.message)
        {
            existing.count += event.count.max(1);
            existing.first_time = match (existing.first_time, event.first_time) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            existing.last_time = match (existing.last_time, event.last_time) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        } else {
            out.push(event);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn pod() -> KubeResource {
        KubeResource::new(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web-1",
                "namespace": "default",
                "labels": {"app": "web"},
                "ownerReferences": [
                    {"kind": "ReplicaSet", "name": "web-6d4b", "controller": true}
                ]
            },
            "spec": {"containers": [{"name": "web", "image": "nginx:1.27"}]},
            "status": {"phase": "Running"}
        }))
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn event(reason: &str, message: &str, last: i64) -> Event {
        Event {
            reason: reason.into(),
            message: message.into(),
            event_type: "Warning".into(),
            count: 1,
            first_time: at(last - 60),
            last_time: at(last),
            object: ObjectRef::default(),
        }
    }

    #[test]
    fn accessors_read_nested_paths() {
        let r = pod();
        assert_eq!(r.kind(), Some("Pod"));
        assert_eq!(r.name(), Some("web-1"));
        assert_eq!(r.namespace(), Some("default"));
        assert_eq!(r.api_version(), Some("v1"));
        assert_eq!(r.nested_str(&["status", "phase"]), Some("Running"));
        assert_eq!(r.nested_slice(&["spec", "containers"]).map(Vec::len), Some(1));
        assert_eq!(r.labels().and_then(|l| l.get("app")).and_then(|v| v.as_str()), Some("web"));
    }

    #[test]
    fn missing_paths_are_none_not_errors() {
        let r = pod();
        assert!(r.nested_str(&["spec", "nodeName"]).is_none());
        assert!(r.nested_i64(&["status", "phase"]).is_none()); // wrong type
        assert!(r.nested(&["no", "such", "path"]).is_none());
    }

    #[test]
    fn owner_refs_skip_malformed_entries() {
        let r = KubeResource::new(json!({
            "metadata": {"ownerReferences": [
                {"kind": "ReplicaSet", "name": "rs-1"},
                {"kind": "Deployment"}
            ]}
        }));
        let refs = r.owner_refs();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "rs-1");
        assert!(!refs[0].controller);
    }

    #[test]
    fn events_sort_most_recent_first() {
        let mut events = vec![event("BackOff", "a", 100), event("Failed", "b", 300), event("Pulled", "c", 200)];
        sort_events_desc(&mut events);
        let reasons: Vec<_> = events.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(reasons, ["Failed", "Pulled", "BackOff"]);
    }

    #[test]
    fn dedupe_merges_identical_series() {
        let deduped = dedupe_events(vec![
            event("BackOff", "restarting", 100),
            event("BackOff", "restarting", 300),
            event("BackOff", "other message", 200),
        ]);
        assert_eq!(deduped.len(), 2);
        let merged = &deduped[0];
        assert_eq!(merged.count, 2);
        assert_eq!(merged.last_time, at(300));
        assert_eq!(merged.first_time, at(40));
    }

    #[test]
    fn dedupe_is_idempotent() {
        let events = vec![event("A", "x", 10), event("A", "x", 20), event("B", "y", 30)];
        let once = dedupe_events(events);
        let twice = dedupe_events(once.clone());
        assert_eq!(once.len(), twice.len());
        assert_eq!(once[0].count, twice[0].count);
    }
}
