// ── Toolgate Atoms: Constants ──────────────────────────────────────────────
// All named constants for the crate live here.
// Collecting them in one place keeps the security policy auditable.

// ── Provider config schema limits ─────────────────────────────────────────
pub const PROVIDER_ID_MAX_LEN: usize = 50;
pub const PROVIDER_NAME_MAX_LEN: usize = 100;
pub const PROVIDER_DESCRIPTION_MAX_LEN: usize = 500;

// ── Registry defaults ─────────────────────────────────────────────────────
/// Maximum number of simultaneously connected providers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
/// Deadline for add/remove/health/capability operations (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
/// Tools can be slow; invocations get a longer deadline (seconds).
pub const DEFAULT_TOOL_CALL_TIMEOUT_SECS: u64 = 120;

// ── Rate limiting ─────────────────────────────────────────────────────────
pub const ADD_SERVER_OPERATION: &str = "add_server";
pub const DEFAULT_ADD_SERVER_MAX_OPS: u32 = 5;
pub const DEFAULT_ADD_SERVER_WINDOW_SECS: u64 = 60;

// ── Command allow-list ────────────────────────────────────────────────────
// Runners that may be spawned as stdio providers. Anything else is rejected
// before a process is created.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] =
    &["npx", "node", "python", "python3", "uv", "uvx", "deno", "bun"];

// ── Path policy ───────────────────────────────────────────────────────────
// Path-like arguments must never point into these directories.
pub const BLOCKED_SYSTEM_DIRS: &[&str] = &[
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/dev", "/proc", "/sys",
    "/root", "/var",
];

// ── Environment variables that hijack the dynamic loader or runtime ───────
pub const BLOCKED_ENV_VARS: &[&str] =
    &["LD_PRELOAD", "LD_LIBRARY_PATH", "DYLD_INSERT_LIBRARIES", "NODE_OPTIONS"];

// ── MCP protocol ──────────────────────────────────────────────────────────
/// MCP protocol version we advertise.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// JSON-RPC "method not found".
pub const JSONRPC_METHOD_NOT_FOUND: i32 = -32601;
/// Header used by streamable HTTP servers to pin a session.
pub const MCP_SESSION_HEADER: &str = "Mcp-Session-Id";
/// Largest single message (line, frame or SSE event) accepted from a server.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
