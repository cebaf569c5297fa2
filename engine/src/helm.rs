use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use opscope_common::args::HelmArgs;
use opscope_sourcehost::client::SourceHostClient;

/// kind/name (and optional namespace) extracted from one rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedId {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

const RENDER_CACHE_CAPACITY: usize = 64;

/// Renders Helm charts touched by a change through the external `helm
/// template` binary and extracts the identifiers of the manifests they
/// produce. Chart files are materialised into a scratch directory that is
/// released on exit; the subprocess is time-bounded and its stdout is the
/// only trusted output. Rendered results are cached in a small LRU keyed
/// by commit and chart path.
pub struct HelmRenderer {
    bin: String,
    timeout: Duration,
    cache: Mutex<RenderCache>,
}

impl HelmRenderer {
    pub fn new(args: &HelmArgs) -> Self {
        Self {
            bin: args.helm_bin.clone(),
            timeout: Duration::from_secs(args.helm_timeout_secs),
            cache: Mutex::new(RenderCache::new(RENDER_CACHE_CAPACITY)),
        }
    }

    pub fn with_defaults() -> Self {
        Self {
            bin: "helm".to_string(),
            timeout: Duration::from_secs(30),
            cache: Mutex::new(RenderCache::new(RENDER_CACHE_CAPACITY)),
        }
    }

    /// Best-effort: individual chart failures are logged and skipped.
    pub async fn chart_impact(
        &self,
        cancel: &CancellationToken,
        sourcehost: &dyn SourceHostClient,
        project_id: i64,
        git_ref: &str,
        changed_files: &[String],
    ) -> Vec<RenderedId> {
        let mut out = Vec::new();
        for root in chart_roots(changed_files) {
            let key = format!("{git_ref}:{root}");
            if let Some(hit) = self.cache.lock().unwrap().get(&key) {
                out.extend(hit);
                continue;
            }
            match self
                .render_chart(cancel, sourcehost, project_id, git_ref, &root, changed_files)
                .await
            {
                Ok(ids) => {
                    self.cache.lock().unwrap().put(key, ids.clone());
                    out.extend(ids);
                }
                Err(e) => {
                    tracing::warn!(chart = %root, error = %format!("{e:#}"), "chart render failed");
                }
            }
        }
        out
    }

    async fn render_chart(
        &self,
        cancel: &CancellationToken,
        sourcehost: &dyn SourceHostClient,
        project_id: i64,
        git_ref: &str,
        root: &str,
        changed_files: &[String],
    ) -> Result<Vec<RenderedId>> {
        let scratch = tempfile::tempdir().context("failed to create scratch directory")?;
        let chart_dir = scratch.path();

        let chart_yaml = sourcehost
            .get_file_content(cancel, project_id, &chart_path(root, "Chart.yaml"), git_ref)
            .await
            .context("failed to fetch Chart.yaml")?;
        tokio::fs::write(chart_dir.join("Chart.yaml"), chart_yaml)
            .await
            .context("failed to write Chart.yaml")?;

        match sourcehost
            .get_file_content(cancel, project_id, &chart_path(root, "values.yaml"), git_ref)
            .await
        {
            Ok(values) => {
                tokio::fs::write(chart_dir.join("values.yaml"), values)
                    .await
                    .context("failed to write values.yaml")?;
            }
            Err(e) => tracing::debug!(chart = %root, error = %format!("{e:#}"), "no values.yaml at ref"),
        }

        let templates_prefix = chart_path(root, "templates/");
        tokio::fs::create_dir_all(chart_dir.join("templates"))
            .await
            .context("failed to create templates directory")?;
        for file in changed_files {
            let Some(rel) = file.strip_prefix(&templates_prefix) else {
                continue;
            };
            if rel.contains('/') || !is_yaml(file) {
                continue;
            }
            let content = sourcehost
                .get_file_content(cancel, project_id, file, git_ref)
                .await
                .with_context(|| format!("failed to fetch template {file}"))?;
            tokio::fs::write(chart_dir.join("templates").join(rel), content)
                .await
                .with_context(|| format!("failed to write template {rel}"))?;
        }

        let mut command = Command::new(&self.bin);
        command.arg("template").arg(chart_dir).kill_on_drop(true);
        let output = tokio::select! {
            _ = cancel.cancelled() => bail!("context cancelled"),
            result = tokio::time::timeout(self.timeout, command.output()) => result
                .map_err(|_| anyhow!("chart render timed out after {:?}", self.timeout))?
                .context("failed to run chart renderer")?,
        };
        if !output.status.success() {
            bail!(
                "chart renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(parse_rendered(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn chart_path(root: &str, name: &str) -> String {
    if root.is_empty() {
        name.to_string()
    } else {
        format!("{root}/{name}")
    }
}

fn is_yaml(file: &str) -> bool {
    file.ends_with(".yaml") || file.ends_with(".yml")
}

/// Chart roots touched by a diff: the parent of a changed `Chart.yaml` or
/// `values.yaml`, or the grandparent of a changed template.
pub fn chart_roots(files: &[String]) -> Vec<String> {
    let mut roots = Vec::new();
    for file in files {
        let root = if let Some(parent) = file
            .strip_suffix("/Chart.yaml")
            .or_else(|| file.strip_suffix("/values.yaml"))
        {
            Some(parent.to_string())
        } else if file == "Chart.yaml" || file == "values.yaml" {
            Some(String::new())
        } else if let Some(idx) = file.find("/templates/") {
            is_yaml(file).then(|| file[..idx].to_string())
        } else if file.starts_with("templates/") {
            is_yaml(file).then(String::new)
        } else {
            None
        };
        if let Some(root) = root
            && !roots.contains(&root)
        {
            roots.push(root);
        }
    }
    roots
}

/// Extract kind/name/namespace from each rendered YAML document.
pub fn parse_rendered(output: &str) -> Vec<RenderedId> {
    let mut ids = Vec::new();
    for doc in output.split("\n---") {
        let doc = doc.trim_start_matches("---").trim();
        if doc.is_empty() {
            continue;
        }
        let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(doc) else {
            continue;
        };
        let Some(kind) = value.get("kind").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(name) = value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
        else {
            continue;
        };
        let namespace = value
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .map(String::from);
        let id = RenderedId {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace,
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

struct RenderCache {
    capacity: usize,
    entries: HashMap<String, Vec<RenderedId>>,
    order: VecDeque<String>,
}

impl RenderCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<RenderedId>> {
        let value = self.entries.get(key)?.clone();
        self.touch(key);
        Some(value)
    }

    fn put(&mut self, key: String, value: Vec<RenderedId>) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        } else {
            self.touch(&key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos).unwrap();
            self.order.push_back(key);
        }
    }
}
