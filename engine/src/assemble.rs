use std::collections::BTreeMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use opscope_cluster::health::HealthStatus;
use opscope_cluster::topology::NamespaceTopology;

use crate::context::ResourceContext;

/// Capability interface over the language model. The client itself lives
/// with the host.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

pub const DEFAULT_MAX_CONTEXT_SIZE: usize = 100_000;
pub const DEFAULT_MAX_PROMPT_SIZE: usize = 100_000;

const TRUNCATION_NOTICE: &str = "\n\n[...Content truncated...]\n\n";
/// Share of the truncation budget kept from the head of the document.
const HEAD_SHARE_PERCENT: usize = 60;
/// Slack reserved for separators when budgeting combined prompts.
const PROMPT_MARGIN: usize = 100;
const MIN_USER_BUDGET: usize = 1000;

/// Example names listed per kind in namespace sections.
const NAMESPACE_EXAMPLES: usize = 5;
/// Names listed per kind in the related-resources section.
const RELATED_CAP: usize = 10;

/// Formats context records into a single bounded document and drives the
/// completion provider. Deterministic given its inputs and limits.
#[derive(Debug, Clone)]
pub struct Assembler {
    max_context_size: usize,
    max_prompt_size: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            max_context_size: DEFAULT_MAX_CONTEXT_SIZE,
            max_prompt_size: DEFAULT_MAX_PROMPT_SIZE,
        }
    }

    pub fn with_limits(max_context_size: usize, max_prompt_size: usize) -> Self {
        Self {
            max_context_size,
            max_prompt_size,
        }
    }

    /// Format one context record, bounded by the context limit.
    pub fn format_resource(&self, rc: &ResourceContext) -> String {
        smart_truncate(&format_unbounded(rc), self.max_context_size)
    }

    /// Format many context records between resource markers, bounded by
    /// the context limit.
    pub fn format_combined(&self, contexts: &[ResourceContext]) -> String {
        if contexts.len() == 1 {
            return self.format_resource(&contexts[0]);
        }
        let total = contexts.len();
        let mut out = format!("# Kubernetes GitOps Context ({total} resources)\n\n");
        for (index, rc) in contexts.iter().enumerate() {
            out.push_str(&format!("--- RESOURCE {}/{} ---\n", index + 1, total));
            out.push_str(&format_unbounded(rc));
            out.push_str("\n------------------------\n");
        }
        smart_truncate(&out, self.max_context_size)
    }

    /// Call the completion provider, first forcing the combined prompts
    /// under the prompt budget.
    pub async fn complete(
        &self,
        provider: &dyn CompletionProvider,
        cancel: &CancellationToken,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let (system_prompt, user_prompt) = self.budget_prompts(system_prompt, user_prompt);
        tokio::select! {
            _ = cancel.cancelled() => bail!("context cancelled"),
            result = provider.complete(&system_prompt, &user_prompt) => result,
        }
    }

    fn budget_prompts(&self, system_prompt: &str, user_prompt: &str) -> (String, String) {
        let limit = self.max_prompt_size;
        if system_prompt.len() + user_prompt.len() <= limit {
            return (system_prompt.to_string(), user_prompt.to_string());
        }
        let user_budget = limit.saturating_sub(system_prompt.len() + PROMPT_MARGIN);
        if user_budget >= MIN_USER_BUDGET {
            return (
                system_prompt.to_string(),
                smart_truncate(user_prompt, user_budget),
            );
        }
        // The system prompt itself crowds out the user prompt; shrink it
        // to half the budget first.
        let system_prompt = smart_truncate(system_prompt, limit / 2);
        let user_budget = limit
            .saturating_sub(system_prompt.len() + PROMPT_MARGIN)
            .max(MIN_USER_BUDGET);
        let user_prompt = smart_truncate(user_prompt, user_budget);
        (system_prompt, user_prompt)
    }
}

/// Head-tail preserving truncation: keep the first 60% and last 40% of the
/// budget, trimmed to sentence boundaries, joined by a notice. Truncating
/// an already-truncated string to the same limit is the identity.
pub fn smart_truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let budget = limit.saturating_sub(TRUNCATION_NOTICE.len());
    let head_budget = budget * HEAD_SHARE_PERCENT / 100;
    let tail_budget = budget - head_budget;

    let head_slice = &text[..floor_boundary(text, head_budget)];
    let head = match head_slice.rfind('.') {
        Some(i) => &head_slice[..=i],
        None => head_slice,
    };

    let tail_slice = &text[ceil_boundary(text, text.len() - tail_budget)..];
    let tail = match tail_slice.find('.') {
        Some(i) => &tail_slice[i + 1..],
        None => tail_slice,
    };

    format!("{head}{TRUNCATION_NOTICE}{tail}")
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn format_unbounded(rc: &ResourceContext) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Kubernetes Resource: {}/{}\n", rc.kind, rc.name));
    if !rc.namespace.is_empty() {
        out.push_str(&format!("Namespace: {}\n", rc.namespace));
    }
    if !rc.api_version.is_empty() {
        out.push_str(&format!("API Version: {}\n", rc.api_version));
    }
    out.push('\n');

    if let Some(data) = &rc.resource_data
        && !data.is_empty()
    {
        out.push_str("## Resource Details\n```json\n");
        out.push_str(data);
        out.push_str("\n```\n\n");
    }

    if rc.kind.eq_ignore_ascii_case("deployment") {
        format_deployment_status(rc, &mut out);
    }
    if rc.kind.eq_ignore_ascii_case("namespace")
        && let Some(topology) = &rc.topology
    {
        format_namespace_sections(topology, &mut out);
    }

    if let Some(argo) = &rc.argo {
        out.push_str("## GitOps Application\n");
        out.push_str(&format!("Application: {}\n", argo.application));
        out.push_str(&format!("Sync Status: {}\n", argo.sync_status));
        out.push_str(&format!("Health Status: {}\n", argo.health_status));
        if !argo.sync_history.is_empty() {
            out.push_str("\n### Recent Sync History\n");
            for entry in &argo.sync_history {
                let time = entry
                    .deployed_at
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| "unknown".to_string());
                out.push_str(&format!(
                    "[{time}] Revision: {}, Status: {}\n",
                    entry.revision, entry.status
                ));
            }
        }
        out.push('\n');
    }

    if let Some(source) = &rc.source_project {
        out.push_str("## Source Project\n");
        out.push_str(&format!("Project: {}\n", source.project.path_with_namespace));
        if !source.project.web_url.is_empty() {
            out.push_str(&format!("URL: {}\n", source.project.web_url));
        }
        if let Some(pipeline) = &source.last_pipeline {
            out.push_str("\n### Last Pipeline\n");
            out.push_str(&format!(
                "Status: {}, Ref: {}, SHA: {}, Created: {}\n",
                pipeline.status,
                pipeline.git_ref,
                pipeline.sha,
                pipeline.created_at.to_iso8601()
            ));
        }
        if let Some(deployment) = &source.last_deployment {
            out.push_str("\n### Last Deployment\n");
            out.push_str(&format!(
                "Status: {}, Environment: {}, Created: {}\n",
                deployment.status,
                deployment.environment.name,
                deployment.created_at.to_iso8601()
            ));
        }
        if !source.recent_commits.is_empty() {
            out.push_str("\n### Recent Commits\n");
            for commit in &source.recent_commits {
                out.push_str(&format!(
                    "- [{}] {} {} ({})\n",
                    commit.created_at.to_iso8601(),
                    commit.short_id,
                    commit.title,
                    commit.author_name
                ));
            }
        }
        out.push('\n');
    }

    if !rc.events.is_empty() {
        out.push_str("## Recent Kubernetes Events\n");
        for (index, event) in rc.events.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {}: {}\n",
                index + 1,
                event.event_type,
                event.reason,
                event.message
            ));
        }
        out.push('\n');
    }

    if !rc.related_resources.is_empty() {
        format_related(&rc.related_resources, &mut out);
    }

    if !rc.errors.is_empty() {
        out.push_str("## Errors in Data Collection\n");
        for error in &rc.errors {
            out.push_str(&format!("- {error}\n"));
        }
        out.push('\n');
    }

    out
}

fn format_deployment_status(rc: &ResourceContext, out: &mut String) {
    let count = |key: &str| {
        rc.metadata
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or_default()
    };
    out.push_str("## Deployment Status\n");
    out.push_str(&format!("Desired Replicas: {}\n", count("desiredReplicas")));
    out.push_str(&format!("Current Replicas: {}\n", count("currentReplicas")));
    out.push_str(&format!("Ready Replicas: {}\n", count("readyReplicas")));
    out.push_str(&format!(
        "Available Replicas: {}\n",
        count("availableReplicas")
    ));

    if let Some(containers) = rc.metadata.get("containers").and_then(Value::as_array)
        && !containers.is_empty()
    {
        out.push_str("\n### Containers\n");
        for container in containers {
            let name = container.get("name").and_then(Value::as_str).unwrap_or("");
            let image = container.get("image").and_then(Value::as_str).unwrap_or("");
            out.push_str(&format!("- {name} ({image})\n"));
            for key in ["requests", "limits"] {
                if let Some(resources) = container.get(key).and_then(Value::as_object)
                    && !resources.is_empty()
                {
                    let rendered: Vec<String> = resources
                        .iter()
                        .map(|(k, v)| format!("{k}={}", v.as_str().unwrap_or_default()))
                        .collect();
                    out.push_str(&format!("  {key}: {}\n", rendered.join(", ")));
                }
            }
        }
    }
    out.push('\n');
}

fn format_namespace_sections(topology: &NamespaceTopology, out: &mut String) {
    // BTreeMap gives a stable kind order.
    let resources: BTreeMap<_, _> = topology.resources.iter().collect();

    out.push_str("## Resources in Namespace\n");
    for (kind, names) in &resources {
        let examples: Vec<&str> = names
            .iter()
            .take(NAMESPACE_EXAMPLES)
            .map(String::as_str)
            .collect();
        let suffix = if names.len() > NAMESPACE_EXAMPLES {
            ", ..."
        } else {
            ""
        };
        out.push_str(&format!(
            "- {kind}: {} ({}{suffix})\n",
            names.len(),
            examples.join(", ")
        ));
    }
    out.push('\n');

    out.push_str("## Health Status\n");
    for (kind, _) in &resources {
        let Some(per_name) = topology.health.get(*kind) else {
            continue;
        };
        let count_of = |status: HealthStatus| {
            per_name.values().filter(|s| **s == status).count()
        };
        let unhealthy: Vec<&str> = per_name
            .iter()
            .filter(|(_, s)| **s == HealthStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .take(NAMESPACE_EXAMPLES)
            .collect();
        out.push_str(&format!(
            "- {kind}: {} healthy, {} progressing, {} unhealthy, {} unknown\n",
            count_of(HealthStatus::Healthy),
            count_of(HealthStatus::Progressing),
            count_of(HealthStatus::Unhealthy),
            count_of(HealthStatus::Unknown),
        ));
        if !unhealthy.is_empty() {
            out.push_str(&format!("  unhealthy: {}\n", unhealthy.join(", ")));
        }
    }
    out.push('\n');
}

fn format_related(related: &[String], out: &mut String) {
    // Entries are `Kind/Name` or `Namespace/Kind/Name`; group by kind.
    let mut by_kind: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for entry in related {
        let parts: Vec<&str> = entry.split('/').collect();
        match parts.as_slice() {
            [kind, name] => by_kind.entry(*kind).or_default().push((*name).to_string()),
            [namespace, kind, name] => by_kind
                .entry(*kind)
                .or_default()
                .push(format!("{namespace}/{name}")),
            _ => by_kind.entry("Other").or_default().push(entry.clone()),
        }
    }

    out.push_str("## Related Resources\n");
    for (kind, names) in by_kind {
        out.push_str(&format!("### {kind}\n"));
        for name in names.iter().take(RELATED_CAP) {
            out.push_str(&format!("- {name}\n"));
        }
        if names.len() > RELATED_CAP {
            out.push_str(&format!("... and {} more\n", names.len() - RELATED_CAP));
        }
    }
    out.push('\n');
}
