// Toolgate Engine — MCP Server Registry
//
// Owns the registered-config set and the live-connection set. Every path
// into a live connection runs through here:
//
//   add_server: rate limit → validate → host check → slot reservation
//               → open transport (timeout) → handshake (timeout) → store
//
// connect_enabled runs the same path minus the rate limit, which only
// budgets control-plane adds.
//
// Any failure on that path leaves no trace: the reserved slot is released
// and an opened transport is closed. Teardown paths (remove, disable,
// cleanup, health) are best-effort and never raise.
//
// Operations on the same provider id are serialized by a per-id async lock;
// different ids proceed concurrently.

use super::audit::{SecurityEvent, SecurityEventKind};
use super::best_effort::BestEffort;
use super::catalog::{build_catalog, Catalog};
use super::client::{CapabilityProvider, McpClient};
use super::defaults::default_providers;
use super::security::{run_with_timeout, SecurityGate};
use super::transport::{DefaultTransportFactory, McpTransport, TransportFactory};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    HostCapabilities, ProviderConfig, ProviderStatus, ServerStatus, TransportKind,
};
use crate::engine::config::{RegistrySettings, ToolgateConfig};
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// An open transport plus the client speaking over it.
pub struct LiveConnection {
    pub provider_id: String,
    pub transport: Arc<dyn McpTransport>,
    pub client: Arc<dyn CapabilityProvider>,
}

#[derive(Default)]
struct RegistryState {
    configs: BTreeMap<String, ProviderConfig>,
    connections: HashMap<String, Arc<LiveConnection>>,
    /// Ids with an add in flight; they hold a connection slot.
    connecting: HashSet<String>,
    last_errors: HashMap<String, String>,
}

/// The tool-provider registry. Share it as `Arc<McpRegistry>`.
pub struct McpRegistry {
    gate: Arc<SecurityGate>,
    factory: Arc<dyn TransportFactory>,
    host: HostCapabilities,
    settings: RegistrySettings,
    state: Mutex<RegistryState>,
    id_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl McpRegistry {
    pub fn new(
        gate: Arc<SecurityGate>,
        factory: Arc<dyn TransportFactory>,
        host: HostCapabilities,
        settings: RegistrySettings,
    ) -> Self {
        McpRegistry {
            gate,
            factory,
            host,
            settings,
            state: Mutex::new(RegistryState::default()),
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry with the real transport factory and register the
    /// providers listed in `config` (without connecting them).
    pub fn from_config(config: &ToolgateConfig, host: HostCapabilities) -> EngineResult<Self> {
        let gate = SecurityGate::new(&config.security)?;
        let registry = McpRegistry::new(
            Arc::new(gate),
            Arc::new(DefaultTransportFactory::new()),
            host,
            config.registry.clone(),
        );
        for provider in &config.providers {
            registry.register(provider.clone());
        }
        Ok(registry)
    }

    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Register the built-in providers, all disabled. Existing entries with
    /// the same id are left alone. No-op on hosts that can neither spawn
    /// processes nor open sockets.
    pub fn initialize(&self) {
        if !self.host.can_spawn_processes && !self.host.can_open_sockets {
            info!("[mcp] Host cannot spawn processes or open sockets; skipping default providers");
            return;
        }
        let mut state = self.state.lock();
        let mut added = 0;
        for provider in default_providers() {
            if !state.configs.contains_key(&provider.id) {
                state.configs.insert(provider.id.clone(), provider);
                added += 1;
            }
        }
        info!("[mcp] Registered {} default providers", added);
    }

    /// Insert or replace a config without connecting it.
    pub fn register(&self, config: ProviderConfig) {
        debug!("[mcp] Registering '{}'", config.id);
        self.state.lock().configs.insert(config.id.clone(), config);
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Validate, connect and store a provider. On success the config is
    /// upserted with `enabled = true`.
    pub async fn add_server(&self, config: ProviderConfig) -> EngineResult<()> {
        let lock = self.id_lock(&config.id);
        let _guard = lock.lock().await;
        self.add_locked(config).await
    }

    /// Connect every registered, enabled provider that is not live yet.
    /// Used at startup; the add rate limit does not apply here, every other
    /// check does.
    pub async fn connect_enabled(&self) -> BTreeMap<String, EngineResult<()>> {
        let pending: Vec<String> = {
            let state = self.state.lock();
            state
                .configs
                .values()
                .filter(|c| c.enabled && !state.connections.contains_key(&c.id))
                .map(|c| c.id.clone())
                .collect()
        };
        info!("[mcp] Connecting {} enabled provider(s)", pending.len());

        let attempts = pending.into_iter().map(|id| async move {
            let lock = self.id_lock(&id);
            let _guard = lock.lock().await;

            let config = self.state.lock().configs.get(&id).filter(|c| c.enabled).cloned();
            let result = match config {
                Some(config) => self.admit(config).await,
                None => Err(EngineError::not_found(&id)),
            };
            if let Err(e) = &result {
                warn!("[mcp] Skipping '{}': {}", id, e);
            }
            (id, result)
        });
        join_all(attempts).await.into_iter().collect()
    }

    async fn add_locked(&self, config: ProviderConfig) -> EngineResult<()> {
        let limit = &self.settings.add_rate_limit;
        if !self.gate.check_rate_limit(&limit.operation, limit.max_ops, limit.window()) {
            self.gate.auditor().record(
                SecurityEvent::new(SecurityEventKind::RateLimited)
                    .provider(&config.id, config.transport)
                    .reasons(vec![format!("operation '{}'", limit.operation)]),
            );
            return Err(EngineError::RateLimited { operation: limit.operation.clone() });
        }
        self.admit(config).await
    }

    /// Everything after the rate limit: validate, sanitize, reserve, connect.
    async fn admit(&self, config: ProviderConfig) -> EngineResult<()> {
        let id = config.id.clone();
        let auditor = self.gate.auditor();

        let report = self.gate.validate(&config);
        if !report.ok {
            auditor.record(
                SecurityEvent::new(SecurityEventKind::ValidationFailed)
                    .provider(&id, config.transport)
                    .reasons(report.errors.clone()),
            );
            return report.into_result();
        }

        if !self.host.supports(config.transport) {
            return Err(EngineError::transport(
                &id,
                format!("this host cannot run {} transports", config.transport),
            ));
        }

        let mut prepared = config.clone();
        if prepared.transport == TransportKind::Stdio {
            let command = config.command.as_deref().unwrap_or_default();
            (prepared.command, prepared.args) = match self.gate.sanitize_command(command, &config.args) {
                Ok((program, args)) => (Some(program), args),
                Err(e) => {
                    if let EngineError::Validation { errors } = &e {
                        auditor.record(
                            SecurityEvent::new(SecurityEventKind::SanitizationFailed)
                                .provider(&id, config.transport)
                                .reasons(errors.clone()),
                        );
                    }
                    return Err(e);
                }
            };
        }

        let slot = self.reserve_slot(&id)?;

        let connection = match self.connect(&prepared).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("[mcp] Failed to add '{}': {}", id, e);
                {
                    let mut state = self.state.lock();
                    if state.configs.contains_key(&id) {
                        state.last_errors.insert(id.clone(), e.to_string());
                    }
                }
                drop(slot);
                return Err(e);
            }
        };

        let mut stored = config;
        stored.enabled = true;
        let transport = stored.transport;
        slot.commit(connection, stored);

        auditor.record(SecurityEvent::new(SecurityEventKind::ServerAdded).provider(&id, transport));
        info!("[mcp] Server '{}' connected", id);
        Ok(())
    }

    /// Open the transport and run the handshake, each under the operation
    /// deadline. The transport is closed if the handshake fails.
    async fn connect(&self, config: &ProviderConfig) -> EngineResult<LiveConnection> {
        let timeout = self.settings.operation_timeout();
        let transport = run_with_timeout(
            &format!("open_transport({})", config.id),
            timeout,
            self.factory.open(config),
        )
        .await?;

        let client = Arc::new(McpClient::new(
            &config.id,
            Arc::clone(&transport),
            timeout,
            self.settings.tool_call_timeout(),
        ));

        let handshake =
            run_with_timeout(&format!("handshake({})", config.id), timeout, client.initialize()).await;
        if let Err(e) = handshake {
            let mut be = BestEffort::new(format!("rollback of '{}'", config.id));
            be.record("transport close", transport.close().await);
            be.finish();
            return Err(e);
        }

        Ok(LiveConnection { provider_id: config.id.clone(), transport, client })
    }

    fn reserve_slot(&self, id: &str) -> EngineResult<SlotReservation<'_>> {
        let mut state = self.state.lock();
        let in_use = state.connections.len() + state.connecting.len();
        if in_use >= self.settings.max_connections {
            return Err(EngineError::LimitExceeded { max: self.settings.max_connections });
        }
        if state.connections.contains_key(id) || state.connecting.contains(id) {
            return Err(EngineError::AlreadyExists { id: id.to_string() });
        }
        state.connecting.insert(id.to_string());
        Ok(SlotReservation { state: &self.state, id: id.to_string(), committed: false })
    }

    /// Disconnect and forget a provider. Close failures are logged, never
    /// raised; unknown ids are a no-op.
    pub async fn remove_server(&self, id: &str) {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let (connection, config) = {
            let mut state = self.state.lock();
            state.last_errors.remove(id);
            (state.connections.remove(id), state.configs.remove(id))
        };

        if let Some(conn) = connection {
            self.teardown(&conn).await;
        }
        if let Some(config) = config {
            self.gate.auditor().record(
                SecurityEvent::new(SecurityEventKind::ServerRemoved).provider(id, config.transport),
            );
            info!("[mcp] Server '{}' removed", id);
        } else {
            debug!("[mcp] remove_server: '{}' was not registered", id);
        }
    }

    /// Set `enabled` and connect. The flag is restored if connecting fails.
    pub async fn enable_server(&self, id: &str) -> EngineResult<()> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let (config, previous) = {
            let mut state = self.state.lock();
            let config = state.configs.get_mut(id).ok_or_else(|| EngineError::not_found(id))?;
            let previous = config.enabled;
            config.enabled = true;
            (config.clone(), previous)
        };

        match self.add_locked(config).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(config) = self.state.lock().configs.get_mut(id) {
                    config.enabled = previous;
                }
                Err(e)
            }
        }
    }

    /// Disconnect a provider but keep its config, with `enabled = false`.
    pub async fn disable_server(&self, id: &str) -> EngineResult<()> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let connection = {
            let mut state = self.state.lock();
            let config = state.configs.get_mut(id).ok_or_else(|| EngineError::not_found(id))?;
            config.enabled = false;
            state.connections.remove(id)
        };

        if let Some(conn) = connection {
            self.teardown(&conn).await;
            info!("[mcp] Server '{}' disabled", id);
        }
        Ok(())
    }

    /// Close client and transport, each under the operation deadline.
    async fn teardown(&self, conn: &LiveConnection) {
        let timeout = self.settings.operation_timeout();
        let mut be = BestEffort::new(format!("teardown of '{}'", conn.provider_id));
        be.record(
            "client close",
            run_with_timeout("close_client", timeout, conn.client.close()).await,
        );
        be.record(
            "transport close",
            run_with_timeout("close_transport", timeout, conn.transport.close()).await,
        );
        be.finish();
    }

    /// Remove every live connection, then clear the enabled flag on what
    /// remains. Never fails; individual errors are logged.
    pub async fn cleanup(&self) {
        let ids: Vec<String> = self.state.lock().connections.keys().cloned().collect();
        info!("[mcp] Cleaning up {} connection(s)", ids.len());

        join_all(ids.iter().map(|id| self.remove_server(id))).await;

        let mut state = self.state.lock();
        for config in state.configs.values_mut() {
            config.enabled = false;
        }
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// Current namespaced catalog across all live connections.
    pub async fn get_tools(&self) -> Catalog {
        let providers = self.snapshot_clients();
        build_catalog(&providers, self.settings.operation_timeout()).await
    }

    pub fn get_server_status(&self, id: &str) -> ServerStatus {
        if self.state.lock().connections.contains_key(id) {
            ServerStatus::Connected
        } else {
            ServerStatus::Disconnected
        }
    }

    /// Per-provider liveness via a capability listing. Unhealthy providers
    /// stay registered and connected.
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let providers = self.snapshot_clients();
        let timeout = self.settings.operation_timeout();
        let checks = providers.iter().map(|(id, client)| async move {
            run_with_timeout(&format!("health_check({})", id), timeout, client.list_capabilities())
                .await
                .map(|_| ())
        });
        let results = join_all(checks).await;

        let mut be = BestEffort::new("health check");
        let mut health = BTreeMap::new();
        for ((id, _), result) in providers.iter().zip(results) {
            health.insert(id.clone(), be.record(id, result).is_some());
        }
        be.finish();
        health
    }

    /// Invoke a catalog capability by its namespaced key.
    pub async fn call_tool(&self, key: &str, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        let connection = {
            let state = self.state.lock();
            let ids: Vec<&String> = state.connections.keys().collect();
            let (provider_id, _) =
                split_capability_key(key, &ids).ok_or_else(|| EngineError::not_found(key))?;
            state.connections.get(provider_id).cloned()
        }
        .ok_or_else(|| EngineError::not_found(key))?;

        let name = key[connection.provider_id.len() + 1..].to_string();
        let result = run_with_timeout(
            &format!("call_tool({})", key),
            self.settings.tool_call_timeout(),
            connection.client.invoke(&name, args),
        )
        .await;

        if let Err(e) = &result {
            if matches!(e, EngineError::Transport { .. }) && !connection.transport.is_alive().await {
                self.drop_dead_connection(&connection, e).await;
            }
        }
        result
    }

    /// A transport died under a caller: forget the connection, keep the config.
    async fn drop_dead_connection(&self, conn: &Arc<LiveConnection>, cause: &EngineError) {
        let id = &conn.provider_id;
        let removed = {
            let mut state = self.state.lock();
            let current = state.connections.get(id).is_some_and(|c| Arc::ptr_eq(c, conn));
            if current {
                state.connections.remove(id);
                state.last_errors.insert(id.clone(), cause.to_string());
            }
            current
        };
        if removed {
            warn!("[mcp] '{}' transport died, connection dropped", id);
            self.teardown(conn).await;
        }
    }

    pub fn list_registered(&self) -> Vec<ProviderConfig> {
        self.state.lock().configs.values().cloned().collect()
    }

    pub fn list_enabled(&self) -> Vec<ProviderConfig> {
        self.state.lock().configs.values().filter(|c| c.enabled).cloned().collect()
    }

    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Status of every registered provider.
    pub fn status_list(&self) -> Vec<ProviderStatus> {
        let state = self.state.lock();
        state
            .configs
            .values()
            .map(|c| ProviderStatus {
                id: c.id.clone(),
                name: c.name.clone(),
                transport: c.transport,
                enabled: c.enabled,
                status: if state.connections.contains_key(&c.id) {
                    ServerStatus::Connected
                } else {
                    ServerStatus::Disconnected
                },
                error: state.last_errors.get(&c.id).cloned(),
            })
            .collect()
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn id_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.id_locks.lock();
        // A count of one means only the map holds it: no holder, no waiter.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn snapshot_clients(&self) -> Vec<(String, Arc<dyn CapabilityProvider>)> {
        let state = self.state.lock();
        let mut providers: Vec<_> = state
            .connections
            .values()
            .map(|c| (c.provider_id.clone(), Arc::clone(&c.client)))
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        providers
    }
}

/// A held connection slot. Released on drop unless committed, so a failed
/// or cancelled add never leaks capacity.
struct SlotReservation<'a> {
    state: &'a Mutex<RegistryState>,
    id: String,
    committed: bool,
}

impl SlotReservation<'_> {
    fn commit(mut self, connection: LiveConnection, config: ProviderConfig) {
        let mut state = self.state.lock();
        state.connecting.remove(&self.id);
        state.last_errors.remove(&self.id);
        state.connections.insert(self.id.clone(), Arc::new(connection));
        state.configs.insert(self.id.clone(), config);
        self.committed = true;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.lock().connecting.remove(&self.id);
        }
    }
}

/// Split `{providerId}_{name}` against known ids. Ids may themselves contain
/// `_`, so the longest matching id wins.
pub fn split_capability_key<'a, S: AsRef<str>>(key: &'a str, ids: &[S]) -> Option<(&'a str, &'a str)> {
    let mut sorted: Vec<&str> = ids.iter().map(|s| s.as_ref()).collect();
    sorted.sort_by_key(|id| std::cmp::Reverse(id.len()));

    for id in sorted {
        if let Some(rest) = key.strip_prefix(id) {
            if let Some(name) = rest.strip_prefix('_') {
                if !name.is_empty() {
                    return Some((&key[..id.len()], name));
                }
            }
        }
    }
    None
}
