// Toolgate Engine — MCP Stdio Transport
//
// Spawns a child process and speaks JSON-RPC over its stdin/stdout.
// Outgoing messages are newline-delimited JSON. The reader also accepts
// Content-Length framed messages (LSP style), which some older servers emit.

use super::{McpTransport, PendingRequests};
use crate::atoms::constants::MAX_MESSAGE_BYTES;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::TransportKind;
use crate::engine::mcp::security::split_command;
use crate::engine::mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// A running stdio transport. Owns the child process and message routing.
pub struct StdioTransport {
    provider: String,
    /// Serialized messages bound for the child's stdin.
    writer_tx: mpsc::Sender<Vec<u8>>,
    pending: PendingRequests,
    child: Arc<Mutex<Option<Child>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn `command` (plus any inline arguments) with `args` and `env`.
    /// Arguments must already be sanitized.
    pub async fn spawn(
        provider: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> EngineResult<Self> {
        let (program, mut full_args) = split_command(command);
        full_args.extend(args.iter().cloned());
        info!("[mcp:stdio] Spawning '{}': {} {}", provider, program, full_args.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&full_args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::transport(provider, format!("failed to spawn '{}': {}", program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::transport(provider, "failed to open stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::transport(provider, "failed to open stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::transport(provider, "failed to open stderr"))?;

        let pending = PendingRequests::default();

        // ── Writer task ────────────────────────────────────────────────
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);
        let writer = {
            let mut stdin = stdin;
            let provider = provider.to_string();
            tokio::spawn(async move {
                while let Some(mut msg) = writer_rx.recv().await {
                    msg.push(b'\n');
                    if let Err(e) = stdin.write_all(&msg).await {
                        error!("[mcp:stdio] '{}' stdin write error: {}", provider, e);
                        break;
                    }
                    if let Err(e) = stdin.flush().await {
                        error!("[mcp:stdio] '{}' stdin flush error: {}", provider, e);
                        break;
                    }
                }
                debug!("[mcp:stdio] '{}' writer task exiting", provider);
            })
        };

        // ── Reader task ────────────────────────────────────────────────
        let reader = {
            let pending = pending.clone();
            let provider = provider.to_string();
            let mut reader = BufReader::new(stdout);
            tokio::spawn(async move {
                loop {
                    match read_message(&mut reader).await {
                        Ok(Some(data)) => match serde_json::from_slice::<JsonRpcResponse>(&data) {
                            Ok(resp) if resp.id.is_some() => {
                                pending.resolve(resp);
                            }
                            Ok(_) => debug!("[mcp:stdio] '{}' notification received", provider),
                            Err(e) => warn!("[mcp:stdio] '{}' unparseable message: {}", provider, e),
                        },
                        Ok(None) => {
                            info!("[mcp:stdio] '{}' stdout closed (server exited)", provider);
                            break;
                        }
                        Err(e) => {
                            error!("[mcp:stdio] '{}' read error: {}", provider, e);
                            break;
                        }
                    }
                }
                pending.fail_all();
            })
        };

        // ── Stderr drain ───────────────────────────────────────────────
        let drain = {
            let provider = provider.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                debug!("[mcp:stderr] {}: {}", provider, trimmed);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("[mcp:stdio] '{}' stderr read error: {}", provider, e);
                            break;
                        }
                    }
                }
            })
        };

        Ok(StdioTransport {
            provider: provider.to_string(),
            writer_tx,
            pending,
            child: Arc::new(Mutex::new(Some(child))),
            tasks: vec![writer, reader, drain],
        })
    }

    async fn write(&self, body: Vec<u8>) -> EngineResult<()> {
        self.writer_tx
            .send(body)
            .await
            .map_err(|_| EngineError::transport(&self.provider, "writer closed"))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn send_request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> EngineResult<JsonRpcResponse> {
        let id = request.id;
        let rx = self.pending.register(id);
        let body = serde_json::to_vec(&request)?;
        if let Err(e) = self.write(body).await {
            self.pending.cancel(id);
            return Err(e);
        }
        self.pending.wait(&self.provider, id, rx, timeout).await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        let body = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        self.write(body).await
    }

    async fn close(&self) -> EngineResult<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            info!("[mcp:stdio] Killing '{}'", self.provider);
            if let Err(e) = child.kill().await {
                // Already exited is not a failure.
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    return Err(EngineError::transport(&self.provider, format!("kill failed: {}", e)));
                }
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        self.pending.fail_all();
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The child itself is reaped by kill_on_drop.
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── Message reader ──────────────────────────────────────────────────────

/// Read one message: either a JSON line or a Content-Length framed body.
/// Returns `Ok(None)` on EOF. Lines and frames over `MAX_MESSAGE_BYTES` are
/// an error.
async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Option<Vec<u8>>, String> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = read_bounded_line(reader, &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(value) = header_value(trimmed, "content-length") {
            let len = value
                .parse::<usize>()
                .map_err(|_| format!("bad Content-Length '{}'", value))?;
            if len > MAX_MESSAGE_BYTES {
                return Err(format!(
                    "Content-Length {} exceeds the {} byte limit",
                    len, MAX_MESSAGE_BYTES
                ));
            }
            skip_headers(reader).await?;
            let mut body = vec![0u8; len];
            reader
                .read_exact(&mut body)
                .await
                .map_err(|e| format!("body read error: {}", e))?;
            return Ok(Some(body));
        }
        return Ok(Some(trimmed.as_bytes().to_vec()));
    }
}

async fn read_bounded_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    line: &mut String,
) -> Result<usize, String> {
    let n = (&mut *reader)
        .take(MAX_MESSAGE_BYTES as u64 + 1)
        .read_line(line)
        .await
        .map_err(|e| format!("read error: {}", e))?;
    if n > MAX_MESSAGE_BYTES {
        return Err(format!("line exceeds the {} byte limit", MAX_MESSAGE_BYTES));
    }
    Ok(n)
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value.trim())
    } else {
        None
    }
}

/// Consume remaining header lines up to and including the blank separator.
async fn skip_headers<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<(), String> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = read_bounded_line(reader, &mut line).await?;
        if n == 0 || line.trim().is_empty() {
            return Ok(());
        }
    }
}
