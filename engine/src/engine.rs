use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use opscope_cluster::client::ClusterClient;
use opscope_cluster::error::Error as ClusterError;
use opscope_cluster::health::HealthStatus;
use opscope_cluster::topology;
use opscope_gitops::client::GitOpsClient;
use opscope_sourcehost::client::SourceHostClient;

use crate::assemble::{Assembler, CompletionProvider};
use crate::classify::Classifier;
use crate::context::{Issue, ResourceContext};
use crate::correlate::{ChangeRef, Correlator};
use crate::helm::HelmRenderer;

/// Closed set of engine operations, dispatched exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest {
    AnalyzeResource {
        kind: String,
        name: String,
        #[serde(default)]
        namespace: String,
        #[serde(default)]
        query: String,
    },
    AnalyzeNamespace { namespace: String },
    AnalyzeChange {
        project_id: i64,
        #[serde(default)]
        commit_sha: Option<String>,
        #[serde(default)]
        merge_request_iid: Option<i64>,
        #[serde(default)]
        query: String,
    },
    TroubleshootResource {
        kind: String,
        name: String,
        #[serde(default)]
        namespace: String,
        #[serde(default)]
        query: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("Completion failed: {0}")]
    Llm(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable code carried on the wire next to the human-readable message.
    pub fn wire_code(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::NotFound(_) => "not_found",
            EngineError::UpstreamUnavailable(_) => "upstream_unavailable",
            EngineError::UpstreamAuth(_) => "upstream_auth",
            EngineError::Llm(_) => "llm_error",
            EngineError::Internal(_) => "internal",
        }
    }
}

/// Structured summary attached to namespace analyses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceAnalysis {
    pub total_resources: usize,
    pub unhealthy: usize,
    pub progressing: usize,
    /// Unhealthy resource counts per kind.
    #[serde(default)]
    pub issues_by_kind: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// The formatted text the model was shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_analysis: Option<NamespaceAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl EngineResponse {
    /// Shape a failed operation into the wire response form.
    pub fn from_error(error: &EngineError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            error_details: Some(format!("{}: {error}", error.wire_code())),
            ..Default::default()
        }
    }
}

const ANALYZE_SYSTEM_PROMPT: &str = "You are a Kubernetes operations analyst. Using the provided \
cluster, GitOps, and source-control context, explain the state of the resource, call out concrete \
problems, and propose next steps. If the context lists data-collection errors, state which inputs \
were unavailable instead of guessing.";

const NAMESPACE_SYSTEM_PROMPT: &str = "You are a Kubernetes operations analyst. Summarise the \
state of the namespace described below: what is running, what is unhealthy or still progressing, \
and which problems deserve attention first.";

const CHANGE_SYSTEM_PROMPT: &str = "You are a Kubernetes operations analyst. A source-control \
change has been mapped to the cluster resources it affects. Assess the blast radius, connect any \
observed problems to the change, and advise whether the change looks safe.";

const TROUBLESHOOT_SYSTEM_PROMPT: &str = "You are a Kubernetes troubleshooting assistant. Work \
from the detected issues and candidate recommendations to a concrete diagnosis, referencing the \
supporting context. If data-collection errors are listed, caveat your conclusions accordingly.";

/// Façade orchestrating the resolver, topology mapper, correlator,
/// classifier, and assembler behind the four public operations.
pub struct Engine {
    cluster: Arc<dyn ClusterClient>,
    provider: Arc<dyn CompletionProvider>,
    correlator: Correlator,
    classifier: Classifier,
    assembler: Assembler,
}

impl Engine {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        gitops: Arc<dyn GitOpsClient>,
        sourcehost: Arc<dyn SourceHostClient>,
        provider: Arc<dyn CompletionProvider>,
        helm: HelmRenderer,
        assembler: Assembler,
    ) -> Self {
        let correlator = Correlator::new(cluster.clone(), gitops, sourcehost, helm);
        let classifier = Classifier::new(cluster.clone());
        Self {
            cluster,
            provider,
            correlator,
            classifier,
            assembler,
        }
    }

    pub async fn handle(
        &self,
        cancel: &CancellationToken,
        request: EngineRequest,
    ) -> Result<EngineResponse, EngineError> {
        match request {
            EngineRequest::AnalyzeResource {
                kind,
                name,
                namespace,
                query,
            } => {
                self.analyze_resource(cancel, &kind, &name, &namespace, &query)
                    .await
            }
            EngineRequest::AnalyzeNamespace { namespace } => {
                self.analyze_namespace(cancel, &namespace).await
            }
            EngineRequest::AnalyzeChange {
                project_id,
                commit_sha,
                merge_request_iid,
                query,
            } => {
                self.analyze_change(cancel, project_id, commit_sha, merge_request_iid, &query)
                    .await
            }
            EngineRequest::TroubleshootResource {
                kind,
                name,
                namespace,
                query,
            } => {
                self.troubleshoot(cancel, &kind, &name, &namespace, query.as_deref())
                    .await
            }
        }
    }

    async fn analyze_resource(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
        query: &str,
    ) -> Result<EngineResponse, EngineError> {
        validate_target(kind, name)?;
        self.cluster
            .resolve(cancel, kind)
            .await
            .map_err(map_cluster_error)?;

        let mut traced = self
            .correlator
            .trace_resource(cancel, kind, name, namespace)
            .await;
        let (issues, _) = self
            .classifier
            .classify(cancel, &traced.context, traced.raw.as_ref())
            .await;
        traced.context.issues = issues;

        let context = self.assembler.format_resource(&traced.context);
        let user_prompt = build_user_prompt(query, &context);
        let analysis = self
            .assembler
            .complete(self.provider.as_ref(), cancel, ANALYZE_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| EngineError::Llm(format!("{e:#}")))?;

        Ok(EngineResponse {
            success: true,
            message: format!("analysis complete for {kind}/{name}"),
            analysis: Some(analysis),
            context: Some(context),
            ..Default::default()
        })
    }

    async fn troubleshoot(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
        query: Option<&str>,
    ) -> Result<EngineResponse, EngineError> {
        validate_target(kind, name)?;
        self.cluster
            .resolve(cancel, kind)
            .await
            .map_err(map_cluster_error)?;

        let mut traced = self
            .correlator
            .trace_resource(cancel, kind, name, namespace)
            .await;
        let (issues, recommendations) = self
            .classifier
            .classify(cancel, &traced.context, traced.raw.as_ref())
            .await;
        traced.context.issues = issues.clone();

        let context = self.assembler.format_resource(&traced.context);
        let mut user_prompt = String::from("Diagnose the following Kubernetes resource.\n\n");
        if let Some(query) = query
            && !query.trim().is_empty()
        {
            user_prompt.push_str(&format!("Operator question: {query}\n\n"));
        }
        if !issues.is_empty() {
            user_prompt.push_str("Detected issues:\n");
            for issue in &issues {
                user_prompt.push_str(&format!(
                    "- [{}] {} ({}): {}\n",
                    issue.severity.as_str(),
                    issue.title,
                    issue.category.as_str(),
                    issue.description
                ));
            }
            user_prompt.push('\n');
        }
        if !recommendations.is_empty() {
            user_prompt.push_str("Candidate recommendations:\n");
            for recommendation in &recommendations {
                user_prompt.push_str(&format!("- {recommendation}\n"));
            }
            user_prompt.push('\n');
        }
        user_prompt.push_str(&context);

        let analysis = self
            .assembler
            .complete(
                self.provider.as_ref(),
                cancel,
                TROUBLESHOOT_SYSTEM_PROMPT,
                &user_prompt,
            )
            .await
            .map_err(|e| EngineError::Llm(format!("{e:#}")))?;

        Ok(EngineResponse {
            success: true,
            message: format!("troubleshooting complete for {kind}/{name}"),
            analysis: Some(analysis),
            context: Some(context),
            issues,
            recommendations,
            ..Default::default()
        })
    }

    async fn analyze_namespace(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
    ) -> Result<EngineResponse, EngineError> {
        if namespace.trim().is_empty() {
            return Err(EngineError::InvalidRequest("namespace is required".into()));
        }
        match self.cluster.namespaces(cancel).await {
            Ok(namespaces) if !namespaces.iter().any(|ns| ns == namespace) => {
                return Err(EngineError::NotFound(format!("namespace {namespace} not found")));
            }
            // A failed listing is not fatal here; the sweep below surfaces
            // cluster unavailability itself.
            _ => {}
        }

        let topology = topology::map_namespace(self.cluster.clone(), cancel, namespace)
            .await
            .map_err(map_cluster_error)?;

        let summary = NamespaceAnalysis {
            total_resources: topology.total_resources(),
            unhealthy: topology.count_with_status(HealthStatus::Unhealthy),
            progressing: topology.count_with_status(HealthStatus::Progressing),
            issues_by_kind: topology
                .health
                .iter()
                .filter_map(|(kind, per_name)| {
                    let unhealthy = per_name
                        .values()
                        .filter(|s| **s == HealthStatus::Unhealthy)
                        .count();
                    (unhealthy > 0).then(|| (kind.clone(), unhealthy))
                })
                .collect(),
        };

        let mut rc = ResourceContext::new("Namespace", namespace, "");
        rc.topology = Some(topology);
        let (issues, _) = self.classifier.classify(cancel, &rc, None).await;
        rc.issues = issues;
        let context = self.assembler.format_resource(&rc);
        let user_prompt = build_user_prompt("", &context);
        let analysis = self
            .assembler
            .complete(self.provider.as_ref(), cancel, NAMESPACE_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| EngineError::Llm(format!("{e:#}")))?;

        Ok(EngineResponse {
            success: true,
            message: format!("namespace analysis complete for {namespace}"),
            analysis: Some(analysis),
            context: Some(context),
            namespace_analysis: Some(summary),
            ..Default::default()
        })
    }

    async fn analyze_change(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        commit_sha: Option<String>,
        merge_request_iid: Option<i64>,
        query: &str,
    ) -> Result<EngineResponse, EngineError> {
        if project_id <= 0 {
            return Err(EngineError::InvalidRequest("project_id is required".into()));
        }
        let change = match (commit_sha, merge_request_iid) {
            (Some(sha), None) if !sha.trim().is_empty() => ChangeRef::Commit(sha),
            (None, Some(iid)) => ChangeRef::MergeRequest(iid),
            _ => {
                return Err(EngineError::InvalidRequest(
                    "exactly one of commit_sha or merge_request_iid is required".into(),
                ));
            }
        };

        let traced = self
            .correlator
            .change_impact(cancel, project_id, &change)
            .await
            .map_err(map_upstream_error)?;

        let mut contexts = Vec::with_capacity(traced.len());
        for mut result in traced {
            let (issues, _) = self
                .classifier
                .classify(cancel, &result.context, result.raw.as_ref())
                .await;
            result.context.issues = issues;
            contexts.push(result.context);
        }

        if contexts.is_empty() {
            return Ok(EngineResponse {
                success: true,
                message: format!("{} affects no tracked resources", change.marker()),
                ..Default::default()
            });
        }

        let context = self.assembler.format_combined(&contexts);
        let user_prompt = build_user_prompt(query, &context);
        let analysis = self
            .assembler
            .complete(self.provider.as_ref(), cancel, CHANGE_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| EngineError::Llm(format!("{e:#}")))?;

        Ok(EngineResponse {
            success: true,
            message: format!(
                "change analysis complete for {} ({} resources)",
                change.marker(),
                contexts.len()
            ),
            analysis: Some(analysis),
            context: Some(context),
            ..Default::default()
        })
    }
}

fn validate_target(kind: &str, name: &str) -> Result<(), EngineError> {
    if kind.trim().is_empty() || name.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "resource kind and name are required".into(),
        ));
    }
    Ok(())
}

fn build_user_prompt(query: &str, context: &str) -> String {
    if query.trim().is_empty() {
        format!("Analyze the following context.\n\n{context}")
    } else {
        format!("{query}\n\n{context}")
    }
}

fn map_cluster_error(error: ClusterError) -> EngineError {
    match error {
        ClusterError::UnknownKind(kind) => {
            EngineError::NotFound(format!("unknown resource kind {kind}"))
        }
        ClusterError::UserInput(message) => EngineError::InvalidRequest(message),
        ClusterError::Kube { source } => EngineError::UpstreamUnavailable(source.to_string()),
        ClusterError::Json { source } => EngineError::Internal(source.to_string()),
        ClusterError::Cancelled => EngineError::Internal("context cancelled".into()),
    }
}

fn map_upstream_error(error: anyhow::Error) -> EngineError {
    let text = format!("{error:#}");
    if text.contains("401") || text.contains("session expired") || text.contains("authentication") {
        EngineError::UpstreamAuth(text)
    } else {
        EngineError::UpstreamUnavailable(text)
    }
}
