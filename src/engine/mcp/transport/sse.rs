// Toolgate Engine — MCP SSE Transport
//
// Legacy remote transport: a long-lived GET returns `text/event-stream`.
// The first `endpoint` event names the URL that requests are POSTed to;
// responses come back on the stream as `message` events and are routed to
// their waiters by JSON-RPC id. The endpoint must share the stream URL's
// origin, since the configured headers travel with every POST.

use super::{McpTransport, PendingRequests};
use crate::atoms::constants::MAX_MESSAGE_BYTES;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::TransportKind;
use crate::engine::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

pub struct SseTransport {
    provider: String,
    http: reqwest::Client,
    headers: HeaderMap,
    /// Where requests are POSTed, as announced by the server.
    endpoint: url::Url,
    pending: PendingRequests,
    alive: Arc<AtomicBool>,
    stream_task: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(
        provider: &str,
        url: &str,
        headers: HeaderMap,
        http: reqwest::Client,
    ) -> EngineResult<Self> {
        let base = url::Url::parse(url)
            .map_err(|e| EngineError::transport(provider, format!("invalid url '{}': {}", url, e)))?;
        info!("[mcp:sse] Connecting '{}' to {}", provider, base);

        let response = http
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| EngineError::transport(provider, format!("stream request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::transport(
                provider,
                format!("stream request returned HTTP {}", response.status()),
            ));
        }

        let pending = PendingRequests::default();
        let alive = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let stream_task = {
            let pending = pending.clone();
            let alive = Arc::clone(&alive);
            let provider = provider.to_string();
            tokio::spawn(async move {
                let mut endpoint_tx = Some(endpoint_tx);
                let mut parser = SseParser::default();
                let mut bytes = response.bytes_stream();

                while let Some(chunk) = bytes.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("[mcp:sse] '{}' stream read error: {}", provider, e);
                            break;
                        }
                    };
                    for event in parser.push(&chunk) {
                        match event.event.as_str() {
                            "endpoint" => {
                                if let Some(tx) = endpoint_tx.take() {
                                    let _ = tx.send(event.data.trim().to_string());
                                }
                            }
                            "message" => match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                                Ok(resp) if resp.id.is_some() => {
                                    pending.resolve(resp);
                                }
                                Ok(_) => debug!("[mcp:sse] '{}' notification received", provider),
                                Err(e) => warn!("[mcp:sse] '{}' unparseable message: {}", provider, e),
                            },
                            other => debug!("[mcp:sse] '{}' ignoring event '{}'", provider, other),
                        }
                    }
                }

                info!("[mcp:sse] '{}' stream closed", provider);
                alive.store(false, Ordering::SeqCst);
                pending.fail_all();
            })
        };

        // Abandoning connect (error or caller timeout) must not leave the
        // stream task running.
        let mut guard = AbortOnDrop(Some(stream_task.abort_handle()));

        let endpoint = match endpoint_rx.await {
            Ok(path) => resolve_endpoint(&base, &path).map_err(|e| EngineError::transport(provider, e)),
            Err(_) => Err(EngineError::transport(provider, "stream closed before endpoint event")),
        };
        let endpoint = endpoint?;
        guard.0 = None;
        debug!("[mcp:sse] '{}' endpoint is {}", provider, endpoint);

        Ok(SseTransport {
            provider: provider.to_string(),
            http,
            headers,
            endpoint,
            pending,
            alive,
            stream_task,
        })
    }

    async fn post(&self, body: Vec<u8>) -> EngineResult<reqwest::Response> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::transport(&self.provider, format!("POST failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(EngineError::transport(
                &self.provider,
                format!("POST returned HTTP {}", response.status()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> EngineResult<JsonRpcResponse> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::transport(&self.provider, "stream is closed"));
        }
        let id = request.id;
        let rx = self.pending.register(id);
        let body = serde_json::to_vec(&request)?;
        if let Err(e) = self.post(body).await {
            self.pending.cancel(id);
            return Err(e);
        }
        self.pending.wait(&self.provider, id, rx, timeout).await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        let body = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        self.post(body).await.map(|_| ())
    }

    async fn close(&self) -> EngineResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!("[mcp:sse] Closing '{}'", self.provider);
        }
        self.stream_task.abort();
        self.pending.fail_all();
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.stream_task.abort();
    }
}

/// Resolve the announced endpoint against the stream URL. Endpoints on
/// another origin are refused.
fn resolve_endpoint(base: &url::Url, raw: &str) -> Result<url::Url, String> {
    let endpoint = base
        .join(raw)
        .map_err(|e| format!("invalid endpoint '{}': {}", raw, e))?;
    if endpoint.origin() != base.origin() {
        warn!("[mcp:sse] Refusing cross-origin endpoint {} (stream is {})", endpoint, base);
        return Err(format!(
            "endpoint '{}' is not on the same origin as {}",
            endpoint,
            base.origin().ascii_serialization()
        ));
    }
    Ok(endpoint)
}

struct AbortOnDrop(Option<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

// ── Event-stream parser ────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Feed it raw chunks as they
/// arrive; complete events come back in order. Bytes are only decoded once
/// a whole line is buffered, so a character split across chunks survives.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=from + offset).collect();
            from = 0;
            let decoded = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = decoded.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        if self.buffer.len() > MAX_MESSAGE_BYTES {
            warn!("[mcp:sse] Dropping unterminated line over {} bytes", MAX_MESSAGE_BYTES);
            self.buffer.clear();
            self.event = None;
            self.data.clear();
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event: event.unwrap_or_else(|| "message".into()), data })
    }
}
