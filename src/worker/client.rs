//! HTTP client for remote worker nodes
//!
//! A worker is addressed either as `host:port` or as a full base URL.
//! Only an HTTP 200 counts as success; every other status and every
//! transport failure is reported as an error for the caller to classify.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Worker Endpoint
// ─────────────────────────────────────────────────────────────────

/// Base URL of a remote worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    base: Url,
}

impl WorkerEndpoint {
    /// Parse a worker address, prefixing `default_scheme` when none is given
    pub fn parse(address: &str, default_scheme: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidWorkerAddress {
            address: address.to_string(),
            message,
        };

        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(invalid("address is empty".to_string()));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("{}://{}", default_scheme, trimmed)
        };

        let base = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
        }
        if base.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self { base })
    }

    /// `<base>/task/process/{task_id}/{node_id}/{step}`
    pub fn process_url(&self, task_id: &str, node_id: &str, step: u32) -> Result<Url> {
        self.join(&["task", "process", task_id, node_id, &step.to_string()])
    }

    /// `<base>/task/finish/{task_id}/{node_id}`
    pub fn finish_url(&self, task_id: &str, node_id: &str) -> Result<Url> {
        self.join(&["task", "finish", task_id, node_id])
    }

    fn join(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

// ─────────────────────────────────────────────────────────────────
// Worker Client Trait
// ─────────────────────────────────────────────────────────────────

/// Outbound calls the task runner makes against a worker
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Ask the worker to advance `task_id` on `node_id` to `step`
    async fn probe(
        &self,
        endpoint: &WorkerEndpoint,
        task_id: &str,
        node_id: &str,
        step: u32,
    ) -> Result<()>;

    /// Tell the worker the task loop is over
    async fn finish(&self, endpoint: &WorkerEndpoint, task_id: &str, node_id: &str) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// HTTP Implementation
// ─────────────────────────────────────────────────────────────────

/// reqwest-backed worker client
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    async fn get(&self, url: Url) -> Result<()> {
        trace!(url = %url, "GET");
        match self.client.get(url.clone()).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => Ok(()),
            Ok(resp) => Err(Error::RemoteStatus {
                url: url.to_string(),
                status: resp.status().as_u16(),
            }),
            Err(e) if e.is_timeout() => Err(Error::ConnectionTimeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Err(e) => Err(Error::connection_failed(url.as_str(), e.to_string())),
        }
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn probe(
        &self,
        endpoint: &WorkerEndpoint,
        task_id: &str,
        node_id: &str,
        step: u32,
    ) -> Result<()> {
        self.get(endpoint.process_url(task_id, node_id, step)?).await
    }

    async fn finish(&self, endpoint: &WorkerEndpoint, task_id: &str, node_id: &str) -> Result<()> {
        self.get(endpoint.finish_url(task_id, node_id)?).await
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
