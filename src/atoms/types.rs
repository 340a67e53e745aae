// ── Toolgate Atoms: Pure Data Types ───────────────────────────────────────────
// Plain struct/enum definitions with no logic beyond constructors.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ── Provider configuration (persisted by the host, if at all) ───────────────

/// A tool provider definition: identity plus how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Unique identifier, `[a-z0-9_-]{1,50}`.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Transport type.
    #[serde(default)]
    pub transport: TransportKind,
    /// Command to spawn (stdio transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the child process, or extra request
    /// headers for remote transports.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint for remote transports (ignored for stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Declared intent. Does not by itself imply a live connection.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub category: ProviderCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Advisory list of capability names. May be absent or stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_capabilities: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// A subprocess provider.
    pub fn stdio(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        ProviderConfig {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            url: None,
            enabled: true,
            category: ProviderCategory::default(),
            version: None,
            author: None,
            declared_capabilities: None,
        }
    }

    /// A remote provider reached over `transport` at `url`.
    pub fn remote(
        id: impl Into<String>,
        name: impl Into<String>,
        transport: TransportKind,
        url: impl Into<String>,
    ) -> Self {
        ProviderConfig {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            transport,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            enabled: true,
            category: ProviderCategory::default(),
            version: None,
            author: None,
            declared_capabilities: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: ProviderCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// How a provider is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Child process speaking over stdin/stdout.
    #[default]
    #[serde(alias = "subprocess")]
    Stdio,
    /// Long-lived server-sent-events stream plus POST endpoint.
    #[serde(alias = "server-sent-events")]
    Sse,
    /// Streaming HTTP: POST per request, JSON or SSE response body.
    #[serde(alias = "streaming-http")]
    StreamableHttp,
}

impl TransportKind {
    /// Whether this kind talks to a network endpoint rather than a child process.
    pub fn is_remote(&self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Sse => write!(f, "sse"),
            TransportKind::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    Filesystem,
    Development,
    Database,
    Web,
    Blockchain,
    Productivity,
    #[default]
    Custom,
}

// ── Host environment ────────────────────────────────────────────────────────

/// What the hosting execution context is able to do. Injected by the host
/// at construction time; a browser-hosted build passes `restricted()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub can_spawn_processes: bool,
    pub can_open_sockets: bool,
}

impl HostCapabilities {
    /// A normal server-side process.
    pub fn server() -> Self {
        HostCapabilities { can_spawn_processes: true, can_open_sockets: true }
    }

    /// A context that can do neither (e.g. browser-hosted code).
    pub fn restricted() -> Self {
        HostCapabilities { can_spawn_processes: false, can_open_sockets: false }
    }

    /// Whether the host can run a transport of this kind at all.
    pub fn supports(&self, kind: TransportKind) -> bool {
        if kind.is_remote() {
            self.can_open_sockets
        } else {
            self.can_spawn_processes
        }
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::server()
    }
}

// ── Runtime status (not persisted) ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Connected => write!(f, "connected"),
            ServerStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Runtime status of a registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    pub enabled: bool,
    pub status: ServerStatus,
    /// Last connection failure, cleared on a successful connect.
    pub error: Option<String>,
}

/// One capability as reported by a provider, before namespacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the capability's input.
    pub input_schema: serde_json::Value,
}
