//! Test doubles for worker communication
//!
//! - `MockWorkerClient`: scripted `WorkerClient` that records every call
//! - `MockHttpServer`: minimal HTTP/1.1 server on a tokio `TcpListener`

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

use super::{WorkerClient, WorkerEndpoint};

// ─────────────────────────────────────────────────────────────────
// Mock Worker Client
// ─────────────────────────────────────────────────────────────────

/// One recorded outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCall {
    Probe { task_id: String, node_id: String, step: u32 },
    Finish { task_id: String, node_id: String },
}

type ProbeHook = Box<dyn Fn(u32) + Send + Sync>;

/// Scripted worker client
#[derive(Default)]
pub struct MockWorkerClient {
    calls: RwLock<Vec<WorkerCall>>,
    failing_steps: HashSet<u32>,
    fail_all_probes: bool,
    fail_finish: bool,
    probe_latency: Duration,
    on_probe: Option<ProbeHook>,
}

impl MockWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes for these steps answer with a transport error
    pub fn failing_steps(mut self, steps: impl IntoIterator<Item = u32>) -> Self {
        self.failing_steps = steps.into_iter().collect();
        self
    }

    pub fn failing_all_probes(mut self) -> Self {
        self.fail_all_probes = true;
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn probe_latency(mut self, latency: Duration) -> Self {
        self.probe_latency = latency;
        self
    }

    /// Run `hook` with the step index while a probe is in flight
    pub fn on_probe(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_probe = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.calls.read().clone()
    }

    pub fn probe_steps(&self) -> Vec<u32> {
        self.calls
            .read()
            .iter()
            .filter_map(|call| match call {
                WorkerCall::Probe { step, .. } => Some(*step),
                WorkerCall::Finish { .. } => None,
            })
            .collect()
    }

    pub fn finish_count(&self) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|call| matches!(call, WorkerCall::Finish { .. }))
            .count()
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn probe(
        &self,
        endpoint: &WorkerEndpoint,
        task_id: &str,
        node_id: &str,
        step: u32,
    ) -> Result<()> {
        self.calls.write().push(WorkerCall::Probe {
            task_id: task_id.to_string(),
            node_id: node_id.to_string(),
            step,
        });

        if let Some(hook) = &self.on_probe {
            hook(step);
        }
        if !self.probe_latency.is_zero() {
            tokio::time::sleep(self.probe_latency).await;
        }

        if self.fail_all_probes || self.failing_steps.contains(&step) {
            let url = endpoint.process_url(task_id, node_id, step)?;
            return Err(Error::connection_failed(url.as_str(), "connection refused"));
        }
        Ok(())
    }

    async fn finish(&self, endpoint: &WorkerEndpoint, task_id: &str, node_id: &str) -> Result<()> {
        self.calls.write().push(WorkerCall::Finish {
            task_id: task_id.to_string(),
            node_id: node_id.to_string(),
        });

        if self.fail_finish {
            let url = endpoint.finish_url(task_id, node_id)?;
            return Err(Error::RemoteStatus {
                url: url.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Mock HTTP Server
// ─────────────────────────────────────────────────────────────────

/// Answers every GET with the status chosen by a responder closure
pub struct MockHttpServer {
    addr: SocketAddr,
    requests: Arc<RwLock<Vec<String>>>,
    accept_task: JoinHandle<()>,
}

impl MockHttpServer {
    /// Start a server on an ephemeral port
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> u16 + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(RwLock::new(Vec::new()));
        let responder = Arc::new(responder);

        let requests_clone = requests.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let requests = requests_clone.clone();
                let responder = responder.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }

                    let head = String::from_utf8_lossy(&buf);
                    let path = head
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();

                    let status = responder(&path);
                    requests.write().push(path);

                    let response = format!(
                        "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}",
                        status
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            requests,
            accept_task,
        }
    }

    /// `host:port` of the server
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request paths received so far, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.requests.read().clone()
    }

    /// An address nothing listens on
    pub async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
