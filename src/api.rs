//! Notification API client.
//!
//! Role-selected history fetch and read confirmation against the portal's
//! REST backend. The bearer token is read from the [`CredentialSource`] on
//! every request.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::constants;
use crate::credentials::{CredentialSource, Role};
use crate::notification::{BackendNotification, NotificationResponse};

/// Which history endpoint to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryScope {
    /// `GET /Notification/Admins`.
    Admin,
    /// `GET /Notification/Student`.
    Student,
}

impl HistoryScope {
    /// Pick the scope for a role set. Admin wins; no portal role means no history.
    pub fn for_roles(roles: &[Role]) -> Option<Self> {
        if roles.contains(&Role::Admin) {
            Some(Self::Admin)
        } else if roles.contains(&Role::Student) {
            Some(Self::Student)
        } else {
            None
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Admin => "Notification/Admins",
            Self::Student => "Notification/Student",
        }
    }
}

/// Request/response collaborator used by the store and the service.
#[async_trait]
pub trait NotificationApi: Send + Sync + std::fmt::Debug {
    /// Fetch persisted notifications, most recent first.
    async fn fetch_history(&self, scope: HistoryScope) -> Result<Vec<BackendNotification>>;

    /// Confirm that one notification was read.
    async fn mark_read(&self, id: &str) -> Result<()>;
}

/// reqwest-backed [`NotificationApi`].
#[derive(Debug, Clone)]
pub struct HttpNotificationApi {
    client: reqwest::Client,
    api_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpNotificationApi {
    /// Creates a client for `api_url` (e.g. `https://host/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, api_url, credentials))
    }

    /// Creates a client with a pre-configured HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Returns the API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `{api_url}/Notification/{id}/read`, with `id` encoded as one path segment.
    fn read_url(&self, id: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .with_context(|| format!("Invalid API URL: {}", self.api_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .push("Notification")
            .push(id)
            .push("read");
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_history(&self, scope: HistoryScope) -> Result<Vec<BackendNotification>> {
        let url = format!("{}/{}", self.api_url, scope.path());
        log::debug!("[Api] GET {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("History request failed: {}", response.status());
        }

        let body: NotificationResponse = response
            .json()
            .await
            .context("Invalid notification history response")?;

        Ok(body.data.unwrap_or_default())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let url = self.read_url(id)?;
        log::debug!("[Api] PUT {}", url);

        let response = self
            .authorize(self.client.put(url.clone()))
            .json(&serde_json::json!({}))
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("Failed to mark notification {} read: {}", id, response.status())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_for_roles() {
        assert_eq!(
            HistoryScope::for_roles(&[Role::Student, Role::Admin]),
            Some(HistoryScope::Admin)
        );
        assert_eq!(HistoryScope::for_roles(&[Role::Student]), Some(HistoryScope::Student));
        assert_eq!(HistoryScope::for_roles(&[Role::Other("Guest".into())]), None);
        assert_eq!(HistoryScope::for_roles(&[]), None);
    }

    #[test]
    fn test_api_url_trailing_slash_trimmed() {
        let api = HttpNotificationApi::with_client(
            reqwest::Client::new(),
            "https://host/api/",
            Arc::new(crate::credentials::SessionCredentials::new()),
        );
        assert_eq!(api.api_url(), "https://host/api");
    }

    #[test]
    fn test_read_url_encodes_id_as_one_segment() {
        let api = HttpNotificationApi::with_client(
            reqwest::Client::new(),
            "https://host/api",
            Arc::new(crate::credentials::SessionCredentials::new()),
        );
        assert_eq!(
            api.read_url("n1").unwrap().as_str(),
            "https://host/api/Notification/n1/read"
        );
        assert_eq!(
            api.read_url("a/b?c#d").unwrap().as_str(),
            "https://host/api/Notification/a%2Fb%3Fc%23d/read"
        );
    }
}
