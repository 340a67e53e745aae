// Toolgate Engine — Capability Catalog
//
// Merges the capabilities of every live connection into one map keyed
// `{providerId}_{capabilityName}`. Built fresh on every call; a provider
// that fails to answer contributes nothing and is logged.

use super::best_effort::BestEffort;
use super::client::CapabilityProvider;
use super::security::run_with_timeout;
use crate::atoms::error::EngineResult;
use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Namespaced catalog key for a provider's capability.
pub fn capability_key(provider_id: &str, name: &str) -> String {
    format!("{}_{}", provider_id, name)
}

/// One invocable capability in the catalog.
#[derive(Clone, Serialize)]
pub struct CapabilityDescriptor {
    pub key: String,
    pub name: String,
    pub provider_id: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip)]
    handle: Arc<dyn CapabilityProvider>,
}

impl CapabilityDescriptor {
    /// Invoke the capability on its provider.
    pub async fn invoke(&self, args: serde_json::Value) -> EngineResult<serde_json::Value> {
        self.handle.invoke(&self.name, args).await
    }
}

impl std::fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("key", &self.key)
            .field("provider_id", &self.provider_id)
            .finish()
    }
}

/// Ordered, namespaced capability map.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeMap<String, CapabilityDescriptor>,
}

impl Catalog {
    pub fn get(&self, key: &str) -> Option<&CapabilityDescriptor> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries belonging to one provider.
    pub fn for_provider<'a>(&'a self, provider_id: &'a str) -> impl Iterator<Item = &'a CapabilityDescriptor> {
        self.entries.values().filter(move |d| d.provider_id == provider_id)
    }
}

/// Query every connection concurrently and merge the results. Each query is
/// bounded by `timeout`. Providers are visited in id order so a key clash
/// (possible when ids contain `_`) keeps the first provider's entry.
pub async fn build_catalog(
    connections: &[(String, Arc<dyn CapabilityProvider>)],
    timeout: Duration,
) -> Catalog {
    let mut sorted: Vec<&(String, Arc<dyn CapabilityProvider>)> = connections.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let queries = sorted.iter().map(|(id, provider)| async move {
        let op = format!("list_capabilities({})", id);
        run_with_timeout(&op, timeout, provider.list_capabilities()).await
    });
    let results = join_all(queries).await;

    let mut catalog = Catalog::default();
    let mut errors = BestEffort::new("catalog build");
    for ((provider_id, provider), result) in sorted.into_iter().zip(results) {
        let Some(capabilities) = errors.record(provider_id, result) else {
            continue;
        };
        debug!("[mcp] '{}' contributed {} capabilities", provider_id, capabilities.len());
        for cap in capabilities {
            let key = capability_key(provider_id, &cap.name);
            if catalog.entries.contains_key(&key) {
                warn!("[mcp] Duplicate capability key '{}' from '{}', skipping", key, provider_id);
                continue;
            }
            catalog.entries.insert(
                key.clone(),
                CapabilityDescriptor {
                    key,
                    name: cap.name,
                    provider_id: provider_id.clone(),
                    description: cap.description,
                    input_schema: cap.input_schema,
                    handle: Arc::clone(provider),
                },
            );
        }
    }
    errors.finish();
    catalog
}
