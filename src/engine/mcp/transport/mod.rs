// Toolgate Engine — MCP Transports
//
// One trait, three wire mechanisms:
//   stdio.rs           — child process, JSON-RPC over stdin/stdout
//   sse.rs             — long-lived event stream + POST endpoint
//   streamable_http.rs — POST per request, JSON or event-stream reply
//
// The registry only ever sees `Arc<dyn McpTransport>`; after construction
// nothing branches on the transport kind.

pub mod sse;
pub mod stdio;
pub mod streamable_http;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ProviderConfig, TransportKind};
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// An open connection to one provider.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send a request and wait up to `timeout` for the matching response.
    async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> EngineResult<JsonRpcResponse>;

    /// Send a notification; no response is expected.
    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> EngineResult<()>;

    /// Release the underlying process or stream. Safe to call more than once.
    async fn close(&self) -> EngineResult<()>;

    async fn is_alive(&self) -> bool;
}

/// Builds transports from validated configs.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, config: &ProviderConfig) -> EngineResult<Arc<dyn McpTransport>>;
}

/// The real factory: spawns processes and opens HTTP connections.
#[derive(Clone, Default)]
pub struct DefaultTransportFactory {
    http: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(&self, config: &ProviderConfig) -> EngineResult<Arc<dyn McpTransport>> {
        match config.transport {
            TransportKind::Stdio => {
                let command = config
                    .command
                    .as_deref()
                    .ok_or_else(|| EngineError::transport(&config.id, "stdio transport requires a command"))?;
                let stdio = StdioTransport::spawn(&config.id, command, &config.args, &config.env).await?;
                Ok(Arc::new(stdio))
            }
            TransportKind::Sse => {
                let url = remote_url(config)?;
                let headers = header_map(&config.id, &config.env)?;
                let sse = SseTransport::connect(&config.id, url, headers, self.http.clone()).await?;
                Ok(Arc::new(sse))
            }
            TransportKind::StreamableHttp => {
                let url = remote_url(config)?;
                let headers = header_map(&config.id, &config.env)?;
                let http = StreamableHttpTransport::connect(&config.id, url, headers, self.http.clone())?;
                Ok(Arc::new(http))
            }
        }
    }
}

fn remote_url(config: &ProviderConfig) -> EngineResult<&str> {
    config
        .url
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| EngineError::transport(&config.id, format!("{} transport requires a url", config.transport)))
}

/// Turn a provider's `env` map into request headers (API keys, bearer tokens).
pub(crate) fn header_map(provider: &str, env: &HashMap<String, String>) -> EngineResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in env {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| EngineError::transport(provider, format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| EngineError::transport(provider, format!("invalid value for header '{}'", name.as_str())))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

// ── Pending request routing ────────────────────────────────────────────

/// Requests awaiting a response, keyed by JSON-RPC id.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
}

impl PendingRequests {
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Hand a response to its waiter. Returns false for unknown ids.
    pub(crate) fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id else {
            return false;
        };
        match self.inner.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
                true
            }
            None => {
                debug!("[mcp] Response for unknown id={}, ignoring", id);
                false
            }
        }
    }

    pub(crate) fn cancel(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub(crate) fn fail_all(&self) {
        self.inner.lock().clear();
    }

    /// Wait for the response to `id`, cleaning up on timeout.
    pub(crate) async fn wait(
        &self,
        provider: &str,
        id: u64,
        rx: oneshot::Receiver<JsonRpcResponse>,
        timeout: Duration,
    ) -> EngineResult<JsonRpcResponse> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(EngineError::transport(provider, "connection closed before response")),
            Err(_) => {
                self.cancel(id);
                Err(EngineError::timeout(format!("{} request id={}", provider, id), timeout))
            }
        }
    }
}
