// Toolgate Engine — MCP Client
//
// Wraps one open transport and speaks MCP over it:
// initialize handshake, tools/list, tools/call.
// The registry and catalog only see it through `CapabilityProvider`.
//
// The transport belongs to whoever opened it (the registry). Closing the
// client only stops it from issuing further requests.

use super::transport::McpTransport;
use super::types::*;
use crate::atoms::constants::{JSONRPC_METHOD_NOT_FOUND, PROTOCOL_VERSION};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::CapabilityInfo;
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Anything that can list and invoke named capabilities.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn list_capabilities(&self) -> EngineResult<Vec<CapabilityInfo>>;

    async fn invoke(&self, name: &str, args: serde_json::Value) -> EngineResult<serde_json::Value>;

    async fn close(&self) -> EngineResult<()>;
}

/// A connected MCP client for a single provider.
pub struct McpClient {
    provider: String,
    transport: Arc<dyn McpTransport>,
    next_id: AtomicU64,
    request_timeout: Duration,
    tool_call_timeout: Duration,
    server_info: Mutex<Option<McpServerInfo>>,
    closed: AtomicBool,
}

impl McpClient {
    pub fn new(
        provider: impl Into<String>,
        transport: Arc<dyn McpTransport>,
        request_timeout: Duration,
        tool_call_timeout: Duration,
    ) -> Self {
        McpClient {
            provider: provider.into(),
            transport,
            next_id: AtomicU64::new(1),
            request_timeout,
            tool_call_timeout,
            server_info: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Name and version the server reported during `initialize`.
    pub fn server_info(&self) -> Option<McpServerInfo> {
        self.server_info.lock().clone()
    }

    /// MCP `initialize` handshake followed by `notifications/initialized`.
    pub async fn initialize(&self) -> EngineResult<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: McpClientCapabilities::default(),
            client_info: McpClientInfo {
                name: "toolgate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        let req = JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            Some(serde_json::to_value(&params)?),
        );
        let resp = self.transport.send_request(req, self.request_timeout).await?;

        if let Some(err) = resp.error {
            return Err(EngineError::Protocol(format!(
                "{}: initialize failed: {} (code={})",
                self.provider, err.message, err.code
            )));
        }
        if let Some(result) = resp.result {
            let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
                EngineError::Protocol(format!("{}: bad initialize result: {}", self.provider, e))
            })?;
            info!(
                "[mcp] Server '{}' initialized (protocol={})",
                self.provider, init.protocol_version
            );
            *self.server_info.lock() = init.server_info;
        }

        self.transport
            .send_notification("notifications/initialized", None)
            .await
    }

    /// `tools/list`. A server without tools support yields an empty list.
    pub async fn list_tools(&self) -> EngineResult<Vec<McpToolDef>> {
        self.ensure_open()?;
        let req = JsonRpcRequest::new(self.next_id(), "tools/list", None);
        let resp = self.transport.send_request(req, self.request_timeout).await?;

        if let Some(err) = resp.error {
            if err.code == JSONRPC_METHOD_NOT_FOUND {
                info!("[mcp] Server '{}' does not expose tools", self.provider);
                return Ok(vec![]);
            }
            return Err(EngineError::Protocol(format!(
                "{}: tools/list failed: {} (code={})",
                self.provider, err.message, err.code
            )));
        }

        match resp.result {
            Some(result) => {
                let list: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                    EngineError::Protocol(format!("{}: bad tools/list result: {}", self.provider, e))
                })?;
                Ok(list.tools)
            }
            None => Ok(vec![]),
        }
    }

    /// `tools/call`. Returns the text content of the result.
    pub async fn call_tool(&self, tool_name: &str, arguments: serde_json::Value) -> EngineResult<String> {
        self.ensure_open()?;
        let params = ToolCallParams { name: tool_name.into(), arguments };
        let req = JsonRpcRequest::new(
            self.next_id(),
            "tools/call",
            Some(serde_json::to_value(&params)?),
        );
        let resp = self.transport.send_request(req, self.tool_call_timeout).await?;

        if let Some(err) = resp.error {
            return Err(EngineError::Protocol(format!(
                "{}: tools/call '{}' failed: {} (code={})",
                self.provider, tool_name, err.message, err.code
            )));
        }

        let result = resp.result.ok_or_else(|| {
            EngineError::Protocol(format!("{}: tools/call '{}': empty result", self.provider, tool_name))
        })?;
        let result: ToolCallResult = serde_json::from_value(result).map_err(|e| {
            EngineError::Protocol(format!("{}: bad tools/call result: {}", self.provider, e))
        })?;

        let text = extract_text_content(&result.content);
        if result.is_error {
            return Err(EngineError::ToolFailed { name: tool_name.to_string(), message: text });
        }
        Ok(text)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::transport(&self.provider, "client is closed"));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl CapabilityProvider for McpClient {
    async fn list_capabilities(&self) -> EngineResult<Vec<CapabilityInfo>> {
        Ok(self.list_tools().await?.into_iter().map(CapabilityInfo::from).collect())
    }

    async fn invoke(&self, name: &str, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        self.call_tool(name, args).await.map(serde_json::Value::String)
    }

    /// Stop issuing requests. The transport is left to its owner.
    async fn close(&self) -> EngineResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("[mcp] Shutting down client for '{}'", self.provider);
        }
        Ok(())
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Text blocks of an MCP result, newline-joined. Other block types are dropped.
fn extract_text_content(content: &[McpContent]) -> String {
    content
        .iter()
        .filter_map(|c| match c {
            McpContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
