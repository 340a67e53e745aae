// Toolgate — tool-server connection manager
//
// Validates provider configs, opens stdio / SSE / streamable-HTTP
// connections to MCP servers, and merges their tools into one namespaced
// catalog for an agent loop.
//
//   atoms/    — constants, error enum, provider data model
//   engine/   — config loading and the MCP connection manager
//   commands/ — control boundary for hosts (CLI, IPC)

pub mod atoms;
pub mod commands;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{
    CapabilityInfo, HostCapabilities, ProviderCategory, ProviderConfig, ProviderStatus,
    ServerStatus, TransportKind,
};
pub use engine::config::ToolgateConfig;
pub use engine::mcp::{Catalog, McpRegistry, SecurityGate};
