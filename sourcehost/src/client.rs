use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use opscope_common::CredentialStore;
use opscope_common::args::SourceHostArgs;
use opscope_common::wait::{self, Transience};

use crate::models::{Commit, Deployment, Diff, MergeRequest, Pipeline, Project};

/// Capability interface over the source-control host API.
#[async_trait]
pub trait SourceHostClient: Send + Sync {
    async fn get_project(&self, cancel: &CancellationToken, id: i64) -> Result<Project>;

    async fn get_project_by_path(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<Project>;

    async fn get_commit(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        sha: &str,
    ) -> Result<Commit>;

    async fn get_commit_diff(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        sha: &str,
    ) -> Result<Vec<Diff>>;

    async fn list_pipelines(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
    ) -> Result<Vec<Pipeline>>;

    async fn recent_deployments(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        environment: &str,
    ) -> Result<Vec<Deployment>>;

    async fn recent_commits(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Commit>>;

    async fn get_merge_request_changes(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        iid: i64,
    ) -> Result<MergeRequest>;

    async fn get_merge_request_commits(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        iid: i64,
    ) -> Result<Vec<Commit>>;

    async fn get_file_content(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        path: &str,
        git_ref: &str,
    ) -> Result<String>;
}

/// Client for the GitLab v4 HTTP API. Authenticates with a PRIVATE-TOKEN
/// header read from the credential store; a 401 re-reads the store once in
/// case the host rotated the token, then retries.
pub struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    creds: Arc<dyn CredentialStore>,
    service: String,
}

impl GitLabClient {
    pub fn new(args: &SourceHostArgs, creds: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: args.gitlab_url.trim_end_matches('/').to_string(),
            creds,
            service: args.gitlab_service.clone(),
        })
    }

    async fn token(&self) -> Result<Option<String>> {
        let cred = self.creds.get(&self.service).await?;
        Ok(cred.token.or(cred.api_key).filter(|t| !t.is_empty()))
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/v4{}", self.base_url, path);
        let mut attempt = 0;
        let mut refreshed = false;
        loop {
            let mut request = self.http.get(&url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(token) = self.token().await? {
                request = request.header("PRIVATE-TOKEN", token);
            }
            let sent = tokio::select! {
                _ = cancel.cancelled() => bail!("context cancelled"),
                r = request.send() => r,
            };
            match sent {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    match wait::classify_status(status.as_u16()) {
                        // The host may have rotated the token in the store;
                        // re-read it once before giving up.
                        Transience::AuthExpired if !refreshed => {
                            refreshed = true;
                        }
                        Transience::Transient if attempt + 1 < wait::MAX_ATTEMPTS => {
                            wait::backoff(cancel, attempt).await?;
                            attempt += 1;
                        }
                        _ => {
                            let body = resp.text().await.unwrap_or_default();
                            bail!(
                                "source host request {path} failed with status {status}: {body}"
                            );
                        }
                    }
                }
                Err(e) if e.status().is_none() && attempt + 1 < wait::MAX_ATTEMPTS => {
                    tracing::warn!(error = %e, path, "source host transport error, retrying");
                    wait::backoff(cancel, attempt).await?;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to send source host request {path}"));
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let resp = self.fetch(cancel, path, query).await?;
        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {path}"))
    }

    async fn get_raw(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<String> {
        let resp = self.fetch(cancel, path, query).await?;
        resp.text()
            .await
            .with_context(|| format!("failed to read response body from {path}"))
    }
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}

#[async_trait]
impl SourceHostClient for GitLabClient {
    async fn get_project(&self, cancel: &CancellationToken, id: i64) -> Result<Project> {
        self.get_json(cancel, &format!("/projects/{id}"), &[]).await
    }

    async fn get_project_by_path(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<Project> {
        self.get_json(cancel, &format!("/projects/{}", encode(path)), &[])
            .await
    }

    async fn get_commit(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        sha: &str,
    ) -> Result<Commit> {
        self.get_json(
            cancel,
            &format!("/projects/{project_id}/repository/commits/{sha}"),
            &[],
        )
        .await
    }

    async fn get_commit_diff(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        sha: &str,
    ) -> Result<Vec<Diff>> {
        self.get_json(
            cancel,
            &format!("/projects/{project_id}/repository/commits/{sha}/diff"),
            &[],
        )
        .await
    }

    async fn list_pipelines(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
    ) -> Result<Vec<Pipeline>> {
        self.get_json(
            cancel,
            &format!("/projects/{project_id}/pipelines"),
            &[("order_by", "updated_at"), ("sort", "desc")],
        )
        .await
    }

    async fn recent_deployments(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        environment: &str,
    ) -> Result<Vec<Deployment>> {
        let mut query = vec![("order_by", "created_at"), ("sort", "desc")];
        if !environment.is_empty() {
            query.push(("environment", environment));
        }
        self.get_json(cancel, &format!("/projects/{project_id}/deployments"), &query)
            .await
    }

    async fn recent_commits(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Commit>> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.get_json(
            cancel,
            &format!("/projects/{project_id}/repository/commits"),
            &[("since", since.as_str())],
        )
        .await
    }

    async fn get_merge_request_changes(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        iid: i64,
    ) -> Result<MergeRequest> {
        self.get_json(
            cancel,
            &format!("/projects/{project_id}/merge_requests/{iid}/changes"),
            &[],
        )
        .await
    }

    async fn get_merge_request_commits(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        iid: i64,
    ) -> Result<Vec<Commit>> {
        self.get_json(
            cancel,
            &format!("/projects/{project_id}/merge_requests/{iid}/commits"),
            &[],
        )
        .await
    }

    async fn get_file_content(
        &self,
        cancel: &CancellationToken,
        project_id: i64,
        path: &str,
        git_ref: &str,
    ) -> Result<String> {
        self.get_raw(
            cancel,
            &format!("/projects/{project_id}/repository/files/{}/raw", encode(path)),
            &[("ref", git_ref)],
        )
        .await
    }
}
