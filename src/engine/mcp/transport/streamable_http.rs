// Toolgate Engine — MCP Streamable HTTP Transport
//
// Each message is its own POST. The server answers with either a JSON body
// or a short `text/event-stream` carrying the response. A session id handed
// out in the `Mcp-Session-Id` header is echoed on every later request and
// released with a DELETE on close.

use super::sse::SseParser;
use super::McpTransport;
use crate::atoms::constants::MCP_SESSION_HEADER;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::TransportKind;
use crate::engine::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct StreamableHttpTransport {
    provider: String,
    http: reqwest::Client,
    url: url::Url,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    alive: AtomicBool,
}

impl StreamableHttpTransport {
    /// No network traffic happens until the first request.
    pub fn connect(
        provider: &str,
        url: &str,
        headers: HeaderMap,
        http: reqwest::Client,
    ) -> EngineResult<Self> {
        let url = url::Url::parse(url)
            .map_err(|e| EngineError::transport(provider, format!("invalid url '{}': {}", url, e)))?;
        info!("[mcp:http] Using {} for '{}'", url, provider);
        Ok(StreamableHttpTransport {
            provider: provider.to_string(),
            http,
            url,
            headers,
            session_id: Mutex::new(None),
            alive: AtomicBool::new(true),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post(&self, body: Vec<u8>) -> EngineResult<reqwest::Response> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::transport(&self.provider, "transport is closed"));
        }
        let mut request = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(session) = self.session_id() {
            request = request.header(MCP_SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::transport(&self.provider, format!("POST failed: {}", e)))?;

        if let Some(session) = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut guard = self.session_id.lock();
            if guard.as_deref() != Some(session) {
                debug!("[mcp:http] '{}' session {}", self.provider, session);
                *guard = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(EngineError::transport(
                &self.provider,
                format!("HTTP {}: {}", status, snippet),
            ));
        }
        Ok(response)
    }

    async fn read_response(&self, id: u64, response: reqwest::Response) -> EngineResult<JsonRpcResponse> {
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_stream {
            let resp: JsonRpcResponse = response.json().await?;
            return Ok(resp);
        }

        let mut parser = SseParser::default();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for event in parser.push(&chunk) {
                if event.event != "message" {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                    Ok(resp) if resp.id == Some(id) => return Ok(resp),
                    Ok(_) => debug!("[mcp:http] '{}' skipping unrelated message", self.provider),
                    Err(e) => debug!("[mcp:http] '{}' unparseable event: {}", self.provider, e),
                }
            }
        }
        Err(EngineError::Protocol(format!(
            "{}: event stream ended without a response to id={}",
            self.provider, id
        )))
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> EngineResult<JsonRpcResponse> {
        let id = request.id;
        let body = serde_json::to_vec(&request)?;
        let exchange = async {
            let response = self.post(body).await?;
            self.read_response(id, response).await
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| EngineError::timeout(format!("{} request id={}", self.provider, id), timeout))?
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
        if !self.alive.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(session) = self.session_id.lock().take() else {
            return Ok(());
        };
        info!("[mcp:http] Ending session for '{}'", self.provider);
        let result = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(MCP_SESSION_HEADER, session)
            .send()
            .await;
        // Servers may not support explicit termination.
        if let Err(e) = result {
            debug!("[mcp:http] '{}' session DELETE failed: {}", self.provider, e);
        }
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
