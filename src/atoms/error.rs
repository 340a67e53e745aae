// ── Toolgate Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • The control-plane taxonomy (Validation, RateLimited, LimitExceeded,
//     AlreadyExists, Timeout, Transport, NotFound) gets one variant each so
//     callers can match on the kind instead of parsing messages.
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `EngineError` → `String` conversion is provided via `Display` so that
//     string-typed boundaries can call `.map_err(|e| e.to_string())`.
//   • No variant carries secret material (API keys, header values) in its message.

use std::time::Duration;
use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Provider configuration failed schema, allow-list, URL or path policy.
    /// Carries every violated rule, not just the first.
    #[error("Validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// A control operation exceeded its allowed frequency.
    #[error("Rate limit exceeded for operation '{operation}'")]
    RateLimited { operation: String },

    /// The maximum number of concurrent connections would be exceeded.
    #[error("Connection limit reached: at most {max} servers may be connected")]
    LimitExceeded { max: usize },

    /// A live connection already exists for this provider id.
    #[error("Server '{id}' is already connected")]
    AlreadyExists { id: String },

    /// An operation did not complete within its deadline.
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The underlying subprocess or stream failed to open, send, or close.
    #[error("Transport error: {provider}: {message}")]
    Transport { provider: String, message: String },

    /// The referenced provider id is not registered.
    #[error("Server '{id}' not found")]
    NotFound { id: String },

    /// A capability ran and reported failure (`isError` in the result).
    #[error("Tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    /// The remote side answered, but not with something we understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a transport error for a provider.
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { provider: provider.into(), message: message.into() }
    }

    /// Create a validation error from a list of reasons.
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    /// Create a not-found error for a provider id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { operation: operation.into(), after }
    }

    /// Short stable name of the error kind, used in logs and security events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::NotFound { .. } => "not_found",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Network(_) => "network",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(format!("TOML parse error: {e}"))
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_reason() {
        let err = EngineError::validation(vec![
            "id must not be empty".into(),
            "url is required".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("id must not be empty"));
        assert!(msg.contains("url is required"));
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_error_into_string() {
        let s: String = EngineError::not_found("github").into();
        assert_eq!(s, "Server 'github' not found");
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let parsed: Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: EngineError = parsed.unwrap_err().into();
        assert_eq!(err.kind(), "config");
    }
}
