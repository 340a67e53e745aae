// Toolgate Engine — MCP (Model Context Protocol) Connection Manager
//
// Connects agent loops to external tool servers and exposes their tools as
// one namespaced catalog.
//
// Architecture:
//   security.rs    — validation, sanitization, URL/path policy, timeouts
//   rate_limit.rs  — fixed-window limiter for control operations
//   audit.rs       — structured security events + monitoring sink
//   transport/     — stdio, SSE and streamable-HTTP behind one trait
//   client.rs      — JSON-RPC initialize / tools-list / tools-call
//   catalog.rs     — `{providerId}_{name}` capability catalog
//   registry.rs    — multi-server lifecycle + tool dispatch
//   defaults.rs    — built-in provider definitions
//   best_effort.rs — collect-and-log helper for teardown paths

pub mod audit;
pub mod best_effort;
pub mod catalog;
pub mod client;
pub mod defaults;
pub mod rate_limit;
pub mod registry;
pub mod security;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the main public types
pub use audit::{SecurityAuditor, SecurityEvent, SecurityEventKind, SecurityEventSink};
pub use catalog::{build_catalog, capability_key, CapabilityDescriptor, Catalog};
pub use client::{CapabilityProvider, McpClient};
pub use registry::McpRegistry;
pub use security::{SecurityGate, ValidationReport};
pub use transport::{DefaultTransportFactory, McpTransport, TransportFactory};
