use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp as reported by the source host. Different endpoints (and API
/// generations) emit integer epoch seconds, float epoch seconds, or a
/// formatted string; all three are accepted. Unparseable strings pass
/// through verbatim when rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexTime {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Default for FlexTime {
    fn default() -> Self {
        FlexTime::Text(String::new())
    }
}

impl FlexTime {
    pub fn is_empty(&self) -> bool {
        matches!(self, FlexTime::Text(s) if s.is_empty())
    }

    /// Render as ISO-8601 where the value parses; otherwise pass through.
    pub fn to_iso8601(&self) -> String {
        match self {
            FlexTime::Int(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_else(|| secs.to_string()),
            FlexTime::Float(secs) => {
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1e9) as u32;
                Utc.timestamp_opt(whole, nanos)
                    .single()
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| secs.to_string())
            }
            FlexTime::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_else(|_| text.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub default_branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub created_at: FlexTime,
}

/// One changed file in a commit or merge request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
    #[serde(default)]
    pub diff: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default)]
    pub id: i64,
    /// `success`, `failed`, `running`, ...
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub created_at: FlexTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub environment: EnvironmentRef,
    #[serde(default)]
    pub created_at: FlexTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeRequest {
    #[serde(default)]
    pub iid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub target_branch: String,
    /// Populated by the changes endpoint.
    #[serde(default)]
    pub changes: Vec<Diff>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flex_time_accepts_all_three_shapes() {
        let int: FlexTime = serde_json::from_str("1735689600").unwrap();
        assert_eq!(int, FlexTime::Int(1735689600));
        assert_eq!(int.to_iso8601(), "2025-01-01T00:00:00Z");

        let float: FlexTime = serde_json::from_str("1735689600.5").unwrap();
        assert!(matches!(float, FlexTime::Float(_)));
        assert_eq!(float.to_iso8601(), "2025-01-01T00:00:00Z");

        let text: FlexTime = serde_json::from_str(r#""2025-01-01T00:00:00+00:00""#).unwrap();
        assert_eq!(text.to_iso8601(), "2025-01-01T00:00:00Z");
    }

    #[test]
    fn unparseable_strings_pass_through() {
        let odd = FlexTime::Text("three days ago".into());
        assert_eq!(odd.to_iso8601(), "three days ago");
    }

    #[test]
    fn commit_defaults_missing_created_at() {
        let commit: Commit =
            serde_json::from_str(r#"{"id": "abc123", "title": "fix deploy"}"#).unwrap();
        assert!(commit.created_at.is_empty());
    }

    #[test]
    fn pipeline_ref_field_renames() {
        let pipeline: Pipeline = serde_json::from_str(
            r#"{"id": 7, "status": "failed", "ref": "main", "created_at": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(pipeline.git_ref, "main");
        assert_eq!(pipeline.status, "failed");
    }
}
