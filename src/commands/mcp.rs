// commands/mcp.rs — control-plane commands for MCP provider management
//
// Hosts (the CLI, an IPC layer) call these with a shared registry. Errors
// stay structured as `EngineError` so callers can match on the kind; use
// `String::from` at string-typed boundaries.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ProviderConfig, ProviderStatus, ServerStatus};
use crate::engine::mcp::McpRegistry;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;

/// One catalog row as seen by a host.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub key: String,
    pub provider_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ── Provider listings ──────────────────────────────────────────────────

pub fn list_registered_providers(registry: &McpRegistry) -> Vec<ProviderConfig> {
    registry.list_registered()
}

pub fn list_enabled_providers(registry: &McpRegistry) -> Vec<ProviderConfig> {
    registry.list_enabled()
}

pub fn provider_status(registry: &McpRegistry, id: &str) -> ServerStatus {
    registry.get_server_status(id)
}

pub fn provider_status_list(registry: &McpRegistry) -> Vec<ProviderStatus> {
    registry.status_list()
}

// ── Catalog ────────────────────────────────────────────────────────────

pub async fn get_catalog(registry: &McpRegistry) -> Vec<CatalogEntry> {
    registry
        .get_tools()
        .await
        .iter()
        .map(|d| CatalogEntry {
            key: d.key.clone(),
            provider_id: d.provider_id.clone(),
            name: d.name.clone(),
            description: d.description.clone(),
            input_schema: d.input_schema.clone(),
        })
        .collect()
}

pub async fn health_check(registry: &McpRegistry) -> BTreeMap<String, bool> {
    registry.health_check().await
}

// ── Lifecycle ──────────────────────────────────────────────────────────

pub async fn add_provider(registry: &McpRegistry, provider: ProviderConfig) -> EngineResult<()> {
    info!("[mcp] add_provider '{}' ({})", provider.id, provider.transport);
    registry.add_server(provider).await
}

pub async fn remove_provider(registry: &McpRegistry, id: &str) {
    registry.remove_server(id).await
}

pub async fn enable_provider(registry: &McpRegistry, id: &str) -> EngineResult<()> {
    registry.enable_server(id).await
}

/// Startup path: connect every enabled provider from the configuration.
/// Returns the error string per provider that could not be connected.
pub async fn connect_enabled_providers(registry: &McpRegistry) -> BTreeMap<String, String> {
    registry
        .connect_enabled()
        .await
        .into_iter()
        .filter_map(|(id, result)| result.err().map(|e| (id, e.to_string())))
        .collect()
}

pub async fn disable_provider(registry: &McpRegistry, id: &str) -> EngineResult<()> {
    registry.disable_server(id).await
}

// ── Invocation ─────────────────────────────────────────────────────────

/// Run a catalog capability. `args` must be a JSON object or null.
pub async fn call_capability(
    registry: &McpRegistry,
    key: &str,
    args: serde_json::Value,
) -> EngineResult<serde_json::Value> {
    let args = match args {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        serde_json::Value::Object(_) => args,
        other => {
            return Err(EngineError::validation(vec![format!(
                "arguments for '{}' must be a JSON object, got {}",
                key, other
            )]))
        }
    };
    registry.call_tool(key, args).await
}
