//! Directory service pass-through
//!
//! Registers or unregisters this node's token with the external directory:
//! `GET <directory>/register/{token}` and `GET <directory>/unregister/{token}`.
//! Task supervision never depends on these calls.

use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info};
use url::Url;

use crate::config::DirectorySettings;
use crate::error::{Error, Result};

/// Client for the directory service
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base: Url,
    client: reqwest::Client,
}

impl DirectoryClient {
    pub fn new(settings: &DirectorySettings) -> Result<Self> {
        let base = Url::parse(&settings.url).map_err(|e| Error::ConfigValidation {
            message: format!("Invalid directory URL '{}': {}", settings.url, e),
            field: Some("directory.url".to_string()),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { base, client })
    }

    /// Register `token`; returns the directory's response body
    pub async fn register(&self, token: &str) -> Result<String> {
        self.call("register", token).await
    }

    /// Unregister `token`; returns the directory's response body
    pub async fn unregister(&self, token: &str) -> Result<String> {
        self.call("unregister", token).await
    }

    async fn call(&self, operation: &str, token: &str) -> Result<String> {
        let body = self
            .request(operation, token)
            .await
            .map_err(|e| Error::DirectoryFailed {
                operation: operation.to_string(),
                message: format!("{:#}", e),
            })?;
        info!(operation, "Directory call succeeded");
        Ok(body)
    }

    async fn request(&self, operation: &str, token: &str) -> anyhow::Result<String> {
        if token.trim().is_empty() {
            bail!("token is empty");
        }

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("{} cannot be a base URL", self.base))?
            .pop_if_empty()
            .extend(&[operation, token]);
        debug!(url = %url, "Calling directory service");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to connect to directory service")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("GET /{}/<token> failed ({}): {}", operation, status, body);
        }
        Ok(body)
    }
}
