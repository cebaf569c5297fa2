use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use opscope_common::CredentialStore;
use opscope_common::args::ArgoArgs;
use opscope_common::wait::{self, Transience};

use crate::models::{
    Application, ApplicationList, HistoryEntry, ResourceTree, SessionRequest, SessionResponse,
};

/// Capability interface over the GitOps controller API.
#[async_trait]
pub trait GitOpsClient: Send + Sync {
    async fn list_applications(&self, cancel: &CancellationToken) -> Result<Vec<Application>>;

    async fn get_application(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Application>;

    async fn resource_tree(&self, cancel: &CancellationToken, name: &str) -> Result<ResourceTree>;

    /// Native resource-to-application lookup. Controllers without the
    /// endpoint return an error; callers fall back to scanning resource
    /// trees.
    async fn applications_by_resource(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<Application>>;

    async fn application_history(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Vec<HistoryEntry>>;
}

/// Client for the ArgoCD HTTP API.
///
/// Authentication: a session token from the credential store when present,
/// otherwise a username/password exchange against `/api/v1/session`. A 401
/// triggers one refresh-and-retry; transient failures retry with backoff.
pub struct ArgoClient {
    http: reqwest::Client,
    base_url: String,
    creds: Arc<dyn CredentialStore>,
    service: String,
    session: RwLock<Option<String>>,
}

impl ArgoClient {
    pub fn new(args: &ArgoArgs, creds: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(args.argocd_insecure)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: args.argocd_url.trim_end_matches('/').to_string(),
            creds,
            service: args.argocd_service.clone(),
            session: RwLock::new(None),
        })
    }

    async fn bearer(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        if let Some(token) = self.session.read().await.clone() {
            return Ok(Some(token));
        }
        let cred = self.creds.get(&self.service).await?;
        if let Some(token) = cred.token.filter(|t| !t.is_empty()) {
            *self.session.write().await = Some(token.clone());
            return Ok(Some(token));
        }
        if let (Some(username), Some(password)) = (cred.username, cred.password) {
            return Ok(Some(self.exchange_session(cancel, &username, &password).await?));
        }
        Ok(None)
    }

    async fn refresh_session(&self, cancel: &CancellationToken) -> Result<()> {
        *self.session.write().await = None;
        let cred = self.creds.get(&self.service).await?;
        let (Some(username), Some(password)) = (cred.username, cred.password) else {
            bail!("gitops session expired and no username/password available to refresh");
        };
        self.exchange_session(cancel, &username, &password).await?;
        Ok(())
    }

    async fn exchange_session(
        &self,
        cancel: &CancellationToken,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let url = format!("{}/api/v1/session", self.base_url);
        let request = self
            .http
            .post(&url)
            .json(&SessionRequest { username, password });
        let resp = tokio::select! {
            _ = cancel.cancelled() => bail!("context cancelled"),
            r = request.send() => r.context("failed to send session request")?,
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("session request failed with status {}: {}", status, body);
        }
        let session: SessionResponse = resp
            .json()
            .await
            .context("failed to parse session response")?;
        *self.session.write().await = Some(session.token.clone());
        self.creds.update_token(&self.service, &session.token).await?;
        Ok(session.token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        let mut refreshed = false;
        loop {
            let token = self.bearer(cancel).await?;
            let mut request = self.http.get(&url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            let sent = tokio::select! {
                _ = cancel.cancelled() => bail!("context cancelled"),
                r = request.send() => r,
            };
            match sent {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<T>()
                        .await
                        .with_context(|| format!("failed to parse response from {path}"));
                }
                Ok(resp) => {
                    let status = resp.status();
                    match wait::classify_status(status.as_u16()) {
                        Transience::AuthExpired if !refreshed => {
                            refreshed = true;
                            self.refresh_session(cancel).await?;
                        }
                        Transience::Transient if attempt + 1 < wait::MAX_ATTEMPTS => {
                            wait::backoff(cancel, attempt).await?;
                            attempt += 1;
                        }
                        _ => {
                            let body = resp.text().await.unwrap_or_default();
                            bail!("gitops request {path} failed with status {status}: {body}");
                        }
                    }
                }
                Err(e) if e.status().is_none() && attempt + 1 < wait::MAX_ATTEMPTS => {
                    tracing::warn!(error = %e, path, "gitops transport error, retrying");
                    wait::backoff(cancel, attempt).await?;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to send gitops request {path}"));
                }
            }
        }
    }
}

#[async_trait]
impl GitOpsClient for ArgoClient {
    async fn list_applications(&self, cancel: &CancellationToken) -> Result<Vec<Application>> {
        let list: ApplicationList = self.get_json(cancel, "/api/v1/applications", &[]).await?;
        Ok(list.items)
    }

    async fn get_application(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Application> {
        self.get_json(cancel, &format!("/api/v1/applications/{name}"), &[])
            .await
    }

    async fn resource_tree(&self, cancel: &CancellationToken, name: &str) -> Result<ResourceTree> {
        self.get_json(cancel, &format!("/api/v1/applications/{name}/resource-tree"), &[])
            .await
    }

    async fn applications_by_resource(
        &self,
        cancel: &CancellationToken,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Vec<Application>> {
        let list: ApplicationList = self
            .get_json(
                cancel,
                "/api/v1/applications",
                &[
                    ("resourceKind", kind),
                    ("resourceName", name),
                    ("resourceNamespace", namespace),
                ],
            )
            .await?;
        Ok(list.items)
    }

    async fn application_history(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Vec<HistoryEntry>> {
        let app = self.get_application(cancel, name).await?;
        Ok(app.status.history)
    }
}
