use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Credentials for one upstream service. All fields optional; clients use
/// whatever subset the service accepts.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub token: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Capability interface over credential storage. Storage and rotation live
/// with the host; the engine only reads tokens and writes refreshed ones.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, service: &str) -> Result<Credential>;
    async fn update_token(&self, service: &str, token: &str) -> Result<()>;
}

/// In-memory credential store. Suitable for hosts that load credentials
/// once at startup and for tests.
#[derive(Default)]
pub struct StaticCredentialStore {
    inner: RwLock<HashMap<String, Credential>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, service: &str, credential: Credential) {
        self.inner
            .write()
            .await
            .insert(service.to_string(), credential);
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get(&self, service: &str) -> Result<Credential> {
        Ok(self
            .inner
            .read()
            .await
            .get(service)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_token(&self, service: &str, token: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry(service.to_string()).or_default();
        entry.token = Some(token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_service_yields_empty_credential() {
        let store = StaticCredentialStore::new();
        let cred = store.get("argocd").await.unwrap();
        assert!(cred.token.is_none());
        assert!(cred.username.is_none());
    }

    #[tokio::test]
    async fn update_token_creates_and_overwrites() {
        let store = StaticCredentialStore::new();
        store.update_token("argocd", "t1").await.unwrap();
        assert_eq!(store.get("argocd").await.unwrap().token.as_deref(), Some("t1"));

        store
            .insert(
                "argocd",
                Credential {
                    username: Some("admin".into()),
                    ..Default::default()
                },
            )
            .await;
        store.update_token("argocd", "t2").await.unwrap();
        let cred = store.get("argocd").await.unwrap();
        assert_eq!(cred.token.as_deref(), Some("t2"));
        assert_eq!(cred.username.as_deref(), Some("admin"));
    }
}
