// In-memory transport and factory that answer MCP requests from a script.
// Test-only.

use super::transport::{McpTransport, TransportFactory};
use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::atoms::constants::{JSONRPC_METHOD_NOT_FOUND, PROTOCOL_VERSION};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ProviderConfig, TransportKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ScriptedTransport {
    kind: TransportKind,
    /// `None` answers tools/list with method-not-found.
    tools: Option<Vec<String>>,
    fail_listing: AtomicBool,
    notifications: Mutex<Vec<String>>,
    closes: AtomicUsize,
    alive: AtomicBool,
}

impl ScriptedTransport {
    fn build(kind: TransportKind, tools: Option<Vec<String>>) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            kind,
            tools,
            fail_listing: AtomicBool::new(false),
            notifications: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
        })
    }

    pub(crate) fn with_tools(tools: &[&str]) -> Arc<Self> {
        Self::build(TransportKind::Stdio, Some(tools.iter().map(|t| t.to_string()).collect()))
    }

    pub(crate) fn without_tools_support() -> Arc<Self> {
        Self::build(TransportKind::Stdio, None)
    }

    pub(crate) fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn notifications(&self) -> Vec<String> {
        self.notifications.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": "scripted", "version": "1.0"}
                }),
            ),
            "tools/list" if self.fail_listing.load(Ordering::SeqCst) => {
                JsonRpcResponse::failure(id, -32603, "listing broken")
            }
            "tools/list" => match &self.tools {
                Some(tools) => JsonRpcResponse::success(
                    id,
                    json!({
                        "tools": tools.iter().map(|name| json!({
                            "name": name,
                            "description": format!("{name} tool"),
                            "inputSchema": {"type": "object", "properties": {}}
                        })).collect::<Vec<_>>()
                    }),
                ),
                None => JsonRpcResponse::failure(id, JSONRPC_METHOD_NOT_FOUND, "Method not found"),
            },
            "tools/call" => {
                let params = request.params.clone().unwrap_or_default();
                let name = params["name"].as_str().unwrap_or_default().to_string();
                if name == "fail" {
                    return JsonRpcResponse::success(
                        id,
                        json!({"content": [{"type": "text", "text": "tool exploded"}], "isError": true}),
                    );
                }
                let text = format!("{}:{}", name, params["arguments"]);
                JsonRpcResponse::success(id, json!({"content": [{"type": "text", "text": text}]}))
            }
            _ => JsonRpcResponse::failure(id, JSONRPC_METHOD_NOT_FOUND, "Method not found"),
        }
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send_request(
        &self,
        request: JsonRpcRequest,
        _timeout: Duration,
    ) -> EngineResult<JsonRpcResponse> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::transport("scripted", "closed"));
        }
        Ok(self.respond(&request))
    }

    async fn send_notification(
        &self,
        method: &str,
        _params: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        self.notifications.lock().push(method.to_string());
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Hands out scripted transports; every provider exposes `search` unless
/// told otherwise.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    tools: Mutex<HashMap<String, Vec<String>>>,
    fail_open: Mutex<HashSet<String>>,
    opened: Mutex<Vec<(String, Arc<ScriptedTransport>)>>,
    configs: Mutex<Vec<ProviderConfig>>,
}

impl ScriptedFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_tools(&self, id: &str, tools: &[&str]) {
        self.tools.lock().insert(id.to_string(), tools.iter().map(|t| t.to_string()).collect());
    }

    pub(crate) fn fail_open(&self, id: &str) {
        self.fail_open.lock().insert(id.to_string());
    }

    pub(crate) fn opened(&self) -> Vec<(String, Arc<ScriptedTransport>)> {
        self.opened.lock().clone()
    }

    /// The config the latest transport for `id` was opened with.
    pub(crate) fn config_for(&self, id: &str) -> Option<ProviderConfig> {
        self.configs.lock().iter().rev().find(|c| c.id == id).cloned()
    }

    pub(crate) fn transport_for(&self, id: &str) -> Option<Arc<ScriptedTransport>> {
        self.opened.lock().iter().rev().find(|(p, _)| p == id).map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn open(&self, config: &ProviderConfig) -> EngineResult<Arc<dyn McpTransport>> {
        self.configs.lock().push(config.clone());
        if self.fail_open.lock().contains(&config.id) {
            return Err(EngineError::transport(&config.id, "connection refused"));
        }
        let tools = self
            .tools
            .lock()
            .get(&config.id)
            .cloned()
            .unwrap_or_else(|| vec!["search".to_string()]);
        let transport = ScriptedTransport::build(config.transport, Some(tools));
        self.opened.lock().push((config.id.clone(), transport.clone()));
        Ok(transport)
    }
}
