// Toolgate Engine — Security Event Log
//
// Every validation failure, sanitization failure, rate-limit rejection and
// successful add/remove becomes a `SecurityEvent`. Events are always written
// as one JSON line through the `log` facade (target `toolgate::security`).
// In the production environment they are also handed to a monitoring sink.

use crate::atoms::types::TransportKind;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Log target for security events, so hosts can route them separately.
pub const SECURITY_LOG_TARGET: &str = "toolgate::security";

/// Environment name that enables forwarding to the monitoring sink.
pub const PRODUCTION_ENVIRONMENT: &str = "production";

// ── Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    ValidationFailed,
    SanitizationFailed,
    RateLimited,
    ServerAdded,
    ServerRemoved,
}

impl SecurityEventKind {
    /// Rejections are logged at warn, lifecycle events at info.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SecurityEventKind::ValidationFailed
                | SecurityEventKind::SanitizationFailed
                | SecurityEventKind::RateLimited
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind) -> Self {
        SecurityEvent {
            kind,
            timestamp: Utc::now(),
            provider_id: None,
            transport: None,
            reasons: Vec::new(),
        }
    }

    pub fn provider(mut self, id: impl Into<String>, transport: TransportKind) -> Self {
        self.provider_id = Some(id.into());
        self.transport = Some(transport);
        self
    }

    pub fn provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    pub fn reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }
}

// ── Sinks ──────────────────────────────────────────────────────────────

/// External monitoring destination. Implementations must not block.
pub trait SecurityEventSink: Send + Sync {
    fn forward(&self, event: &SecurityEvent);
}

/// Writes events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SecurityEventSink for LogSink {
    fn forward(&self, event: &SecurityEvent) {
        let line = serde_json::to_string(event).unwrap_or_else(|_| format!("{:?}", event));
        if event.kind.is_rejection() {
            warn!(target: SECURITY_LOG_TARGET, "[mcp:security] {}", line);
        } else {
            info!(target: SECURITY_LOG_TARGET, "[mcp:security] {}", line);
        }
    }
}

/// Records security events: always to the log, and to `monitor` in production.
#[derive(Clone)]
pub struct SecurityAuditor {
    environment: String,
    monitor: Option<Arc<dyn SecurityEventSink>>,
}

impl SecurityAuditor {
    pub fn new(environment: impl Into<String>) -> Self {
        SecurityAuditor { environment: environment.into(), monitor: None }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn SecurityEventSink>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case(PRODUCTION_ENVIRONMENT)
    }

    pub fn record(&self, event: SecurityEvent) {
        LogSink.forward(&event);
        if self.is_production() {
            if let Some(monitor) = &self.monitor {
                monitor.forward(&event);
            }
        }
    }
}

impl Default for SecurityAuditor {
    fn default() -> Self {
        SecurityAuditor::new("development")
    }
}

impl std::fmt::Debug for SecurityAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityAuditor")
            .field("environment", &self.environment)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<SecurityEventKind>>);

    impl SecurityEventSink for Capture {
        fn forward(&self, event: &SecurityEvent) {
            self.0.lock().push(event.kind);
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = SecurityEvent::new(SecurityEventKind::ValidationFailed)
            .provider("bad", TransportKind::Stdio)
            .reasons(vec!["Command not allowed: curl".into()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "validation_failed");
        assert_eq!(json["provider_id"], "bad");
        assert_eq!(json["transport"], "stdio");
        assert_eq!(json["reasons"][0], "Command not allowed: curl");
    }

    #[test]
    fn test_monitor_only_in_production() {
        let capture = Arc::new(Capture::default());

        let dev = SecurityAuditor::new("development").with_monitor(capture.clone());
        dev.record(SecurityEvent::new(SecurityEventKind::RateLimited));
        assert!(capture.0.lock().is_empty());

        let prod = SecurityAuditor::new("production").with_monitor(capture.clone());
        prod.record(SecurityEvent::new(SecurityEventKind::ServerAdded).provider_id("x"));
        assert_eq!(*capture.0.lock(), vec![SecurityEventKind::ServerAdded]);
    }
}
