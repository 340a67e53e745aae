// Integration tests: drive the registry end to end through the public API,
// mostly with an in-memory MCP server standing in for real subprocesses.
// The last section spawns a real python3 server when one is installed.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use toolgate::commands::mcp as commands;
use toolgate::engine::config::{RegistrySettings, SecurityPolicy};
use toolgate::engine::mcp::types::{JsonRpcRequest, JsonRpcResponse};
use toolgate::engine::mcp::{
    McpTransport, SecurityAuditor, SecurityEvent, SecurityEventKind, SecurityEventSink,
    TransportFactory,
};
use toolgate::{
    EngineError, EngineResult, HostCapabilities, McpRegistry, ProviderConfig, SecurityGate,
    ServerStatus, ToolgateConfig, TransportKind,
};

// ── In-memory MCP server ───────────────────────────────────────────────

struct FakeServer {
    kind: TransportKind,
    tools: Vec<String>,
    alive: AtomicBool,
    closes: AtomicUsize,
}

#[async_trait]
impl McpTransport for FakeServer {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send_request(&self, req: JsonRpcRequest, _timeout: Duration) -> EngineResult<JsonRpcResponse> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::transport("fake", "closed"));
        }
        let result = match req.method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "fake", "version": "0.0.1"}
            }),
            "tools/list" => json!({
                "tools": self.tools.iter().map(|t| json!({
                    "name": t,
                    "description": "",
                    "inputSchema": {"type": "object"}
                })).collect::<Vec<_>>()
            }),
            "tools/call" => {
                let name = req.params.as_ref().and_then(|p| p["name"].as_str()).unwrap_or("");
                json!({"content": [{"type": "text", "text": format!("ran {name}")}]})
            }
            _ => return Ok(JsonRpcResponse::failure(req.id, -32601, "Method not found")),
        };
        Ok(JsonRpcResponse::success(req.id, result))
    }

    async fn send_notification(&self, _method: &str, _params: Option<serde_json::Value>) -> EngineResult<()> {
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

#[derive(Default)]
struct FakeFactory {
    refuse: Mutex<HashSet<String>>,
    opened: Mutex<Vec<(String, Arc<FakeServer>)>>,
}

impl FakeFactory {
    fn refuse(&self, id: &str) {
        self.refuse.lock().insert(id.to_string());
    }

    fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    fn all_closed(&self) -> bool {
        self.opened.lock().iter().all(|(_, s)| s.closes.load(Ordering::SeqCst) >= 1)
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open(&self, config: &ProviderConfig) -> EngineResult<Arc<dyn McpTransport>> {
        if self.refuse.lock().contains(&config.id) {
            return Err(EngineError::transport(&config.id, "spawn failed"));
        }
        let server = Arc::new(FakeServer {
            kind: config.transport,
            tools: vec!["search".into(), "read_file".into()],
            alive: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        });
        self.opened.lock().push((config.id.clone(), Arc::clone(&server)));
        Ok(server)
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl SecurityEventSink for RecordingSink {
    fn forward(&self, event: &SecurityEvent) {
        self.events.lock().push(event.clone());
    }
}

fn setup() -> (Arc<McpRegistry>, Arc<FakeFactory>) {
    setup_with(RegistrySettings::default())
}

fn setup_with(settings: RegistrySettings) -> (Arc<McpRegistry>, Arc<FakeFactory>) {
    let factory = Arc::new(FakeFactory::default());
    let gate = SecurityGate::new(&SecurityPolicy::default()).unwrap();
    let registry = McpRegistry::new(
        Arc::new(gate),
        factory.clone(),
        HostCapabilities::server(),
        settings,
    );
    (Arc::new(registry), factory)
}

fn stdio(id: &str) -> ProviderConfig {
    ProviderConfig::stdio(id, id, "npx", vec!["-y".into(), format!("@example/{id}-server")])
}

// ── Lifecycle ──────────────────────────────────────────────────────────

#[tokio::test]
async fn add_list_remove_scenario() {
    let (registry, factory) = setup();
    commands::add_provider(&registry, stdio("notes")).await.unwrap();

    let keys: Vec<String> = commands::get_catalog(&registry).await.into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["notes_read_file", "notes_search"]);

    commands::remove_provider(&registry, "notes").await;
    assert!(commands::get_catalog(&registry).await.is_empty());
    assert!(commands::list_registered_providers(&registry).is_empty());
    assert!(factory.all_closed());
}

#[tokio::test]
async fn duplicate_add_leaves_state_untouched() {
    let (registry, factory) = setup();
    registry.add_server(stdio("notes")).await.unwrap();
    let before = registry.list_registered();

    let err = registry.add_server(stdio("notes")).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { ref id } if id == "notes"));
    assert_eq!(registry.list_registered(), before);
    assert_eq!(factory.open_count(), 1);
}

#[tokio::test]
async fn dangerous_command_fails_closed() {
    let (registry, factory) = setup();
    let config = ProviderConfig::stdio("evil", "Evil", "sudo", vec!["rm".into(), "-rf".into(), "/".into()]);

    let err = registry.add_server(config).await.unwrap_err();
    match err {
        EngineError::Validation { errors } => assert!(!errors.is_empty()),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(factory.open_count(), 0);
    assert_eq!(registry.get_server_status("evil"), ServerStatus::Disconnected);
}

#[tokio::test]
async fn failed_open_leaves_no_partial_state() {
    let (registry, factory) = setup();
    factory.refuse("flaky");

    let err = registry.add_server(stdio("flaky")).await.unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert_eq!(registry.get_server_status("flaky"), ServerStatus::Disconnected);
    assert!(registry.get_tools().await.is_empty());
    assert!(registry.list_registered().is_empty());
}

#[tokio::test]
async fn failed_open_releases_connection_slot() {
    let (registry, factory) = setup_with(RegistrySettings { max_connections: 1, ..Default::default() });
    factory.refuse("flaky");

    assert!(registry.add_server(stdio("flaky")).await.is_err());
    registry.add_server(stdio("steady")).await.unwrap();
    assert_eq!(registry.connected_ids(), vec!["steady".to_string()]);
}

#[tokio::test]
async fn same_tool_name_is_namespaced_per_provider() {
    let (registry, _) = setup();
    registry.add_server(stdio("a")).await.unwrap();
    registry.add_server(stdio("b")).await.unwrap();

    let catalog = registry.get_tools().await;
    assert!(catalog.contains_key("a_search"));
    assert!(catalog.contains_key("b_search"));
    assert_eq!(catalog.get("b_search").unwrap().provider_id, "b");

    let out = commands::call_capability(&registry, "a_search", json!({"q": "rust"})).await.unwrap();
    assert_eq!(out, json!("ran search"));
}

#[tokio::test(start_paused = true)]
async fn add_rate_limit_recovers_after_window() {
    let (registry, _) = setup();
    for i in 0..5 {
        registry.add_server(stdio(&format!("p{i}"))).await.unwrap();
    }
    let err = registry.add_server(stdio("p5")).await.unwrap_err();
    assert!(matches!(err, EngineError::RateLimited { .. }));

    tokio::time::advance(Duration::from_secs(61)).await;
    registry.add_server(stdio("p5")).await.unwrap();
}

#[tokio::test]
async fn cleanup_converges() {
    let (registry, factory) = setup();
    registry.initialize();
    registry.add_server(stdio("one")).await.unwrap();
    registry.add_server(stdio("two")).await.unwrap();
    registry.enable_server("memory").await.unwrap();

    registry.cleanup().await;

    assert!(registry.list_enabled().is_empty());
    assert!(registry.connected_ids().is_empty());
    assert!(factory.all_closed());
    assert_eq!(factory.open_count(), 3);
}

#[tokio::test]
async fn default_filesystem_with_curl_is_rejected() {
    let (registry, factory) = setup();
    registry.initialize();

    let mut filesystem = registry
        .list_registered()
        .into_iter()
        .find(|p| p.id == "filesystem")
        .unwrap();
    filesystem.command = Some("curl".into());
    filesystem.args = vec!["http://example.com/install.sh".into()];

    let err = registry.add_server(filesystem).await.unwrap_err();
    assert!(err.to_string().contains("curl"), "{err}");
    assert_eq!(registry.get_server_status("filesystem"), ServerStatus::Disconnected);
    assert_eq!(factory.open_count(), 0);
}

#[tokio::test]
async fn restricted_host_skips_defaults() {
    let factory = Arc::new(FakeFactory::default());
    let gate = SecurityGate::new(&SecurityPolicy::default()).unwrap();
    let registry = McpRegistry::new(
        Arc::new(gate),
        factory,
        HostCapabilities::restricted(),
        RegistrySettings::default(),
    );
    registry.initialize();
    assert!(registry.list_registered().is_empty());

    let err = registry.add_server(stdio("x")).await.unwrap_err();
    assert_eq!(err.kind(), "transport");
}

// ── Remote providers ───────────────────────────────────────────────────

#[tokio::test]
async fn remote_provider_domain_policy() {
    let factory = Arc::new(FakeFactory::default());
    let policy = SecurityPolicy {
        allowed_domains: vec!["*.example.com".into()],
        ..SecurityPolicy::default()
    };
    let gate = SecurityGate::new(&policy).unwrap();
    let registry = McpRegistry::new(
        Arc::new(gate),
        factory.clone(),
        HostCapabilities::server(),
        RegistrySettings::default(),
    );

    let good = ProviderConfig::remote("docs", "Docs", TransportKind::Sse, "https://mcp.example.com/sse");
    registry.add_server(good).await.unwrap();

    let bad = ProviderConfig::remote("other", "Other", TransportKind::StreamableHttp, "https://evil.test/mcp");
    assert!(matches!(registry.add_server(bad).await, Err(EngineError::Validation { .. })));

    let bad_scheme = ProviderConfig::remote("ftp", "Ftp", TransportKind::Sse, "ftp://mcp.example.com/");
    assert!(matches!(registry.add_server(bad_scheme).await, Err(EngineError::Validation { .. })));
    assert_eq!(factory.open_count(), 1);
}

// ── Auditing ───────────────────────────────────────────────────────────

#[tokio::test]
async fn production_forwards_security_events() {
    let sink = Arc::new(RecordingSink::default());
    let auditor = SecurityAuditor::new("production").with_monitor(sink.clone());
    let gate = SecurityGate::new(&SecurityPolicy::default()).unwrap().with_auditor(auditor);
    let registry = McpRegistry::new(
        Arc::new(gate),
        Arc::new(FakeFactory::default()),
        HostCapabilities::server(),
        RegistrySettings::default(),
    );

    registry.add_server(stdio("good")).await.unwrap();
    let _ = registry
        .add_server(ProviderConfig::stdio("bad", "Bad", "bash", vec!["-c".into(), "id".into()]))
        .await;
    registry.remove_server("good").await;

    let kinds: Vec<SecurityEventKind> = sink.events.lock().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SecurityEventKind::ServerAdded,
            SecurityEventKind::ValidationFailed,
            SecurityEventKind::ServerRemoved,
        ]
    );
    let rejected = &sink.events.lock()[1];
    assert_eq!(rejected.provider_id.as_deref(), Some("bad"));
    assert!(!rejected.reasons.is_empty());
}

// ── Configuration ──────────────────────────────────────────────────────

#[test]
fn registry_from_config_registers_without_connecting() {
    let config = ToolgateConfig::from_toml_str(
        r#"
        [registry]
        max_connections = 3

        [[providers]]
        id = "notes"
        name = "Notes"
        command = "npx"
        args = ["-y", "@example/notes-server"]
        enabled = false
        "#,
    )
    .unwrap();

    let registry = McpRegistry::from_config(&config, HostCapabilities::server()).unwrap();
    assert_eq!(registry.settings().max_connections, 3);
    assert_eq!(registry.list_registered().len(), 1);
    assert!(registry.connected_ids().is_empty());
}

// ── Real subprocess ────────────────────────────────────────────────────

/// A minimal MCP server: newline JSON in, newline JSON out, except for
/// tools/list which answers with a Content-Length frame.
const PY_SERVER: &str = r#"
import json
import sys

def send(msg, framed=False):
    body = json.dumps(msg).encode()
    if framed:
        sys.stdout.buffer.write(b"Content-Length: %d\r\n\r\n" % len(body) + body)
    else:
        sys.stdout.buffer.write(body + b"\n")
    sys.stdout.buffer.flush()

while True:
    line = sys.stdin.readline()
    if not line:
        break
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    if "id" not in msg:
        continue
    method = msg.get("method")
    if method == "initialize":
        send({"jsonrpc": "2.0", "id": msg["id"], "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "py-echo", "version": "1.0"},
        }})
    elif method == "tools/list":
        send({"jsonrpc": "2.0", "id": msg["id"], "result": {"tools": [{
            "name": "echo",
            "description": "Echo the text argument",
            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}},
        }]}}, framed=True)
    elif method == "tools/call":
        text = msg["params"].get("arguments", {}).get("text", "")
        send({"jsonrpc": "2.0", "id": msg["id"], "result": {"content": [{"type": "text", "text": text}]}})
    else:
        send({"jsonrpc": "2.0", "id": msg["id"], "error": {"code": -32601, "message": "Method not found"}})
"#;

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
#[tokio::test]
async fn stdio_python_server_end_to_end() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let dir = tempfile::Builder::new().prefix("toolgate").tempdir().unwrap();
    let script = dir.path().join("server.py");
    std::fs::write(&script, PY_SERVER).unwrap();
    let script = script.to_string_lossy().into_owned();

    let registry = McpRegistry::from_config(&ToolgateConfig::default(), HostCapabilities::server()).unwrap();

    // Arguments given separately.
    registry
        .add_server(ProviderConfig::stdio("py", "Python echo", "python3", vec!["-u".into(), script.clone()]))
        .await
        .unwrap();
    // Arguments written inline in the command, connected through the startup path.
    registry.register(ProviderConfig::stdio("inline", "Inline echo", format!("python3 -u {script}"), vec![]));
    let results = registry.connect_enabled().await;
    assert!(matches!(results.get("inline"), Some(Ok(()))), "{results:?}");

    let catalog = registry.get_tools().await;
    assert!(catalog.contains_key("py_echo"));
    assert!(catalog.contains_key("inline_echo"));

    let out = registry.call_tool("py_echo", json!({"text": "héllo"})).await.unwrap();
    assert_eq!(out, json!("héllo"));
    let health = registry.health_check().await;
    assert_eq!(health.get("py"), Some(&true));

    registry.remove_server("py").await;
    let catalog = registry.get_tools().await;
    assert!(!catalog.keys().any(|k| k.starts_with("py_")));
    assert_eq!(registry.get_server_status("py"), ServerStatus::Disconnected);

    registry.cleanup().await;
    assert!(registry.connected_ids().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn stdio_inline_path_into_system_dir_is_refused() {
    let registry = McpRegistry::from_config(&ToolgateConfig::default(), HostCapabilities::server()).unwrap();
    let err = registry
        .add_server(ProviderConfig::stdio("leak", "Leak", "node /etc/shadow", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
    assert!(err.to_string().contains("/etc/shadow"));
    assert!(registry.list_registered().is_empty());
}
