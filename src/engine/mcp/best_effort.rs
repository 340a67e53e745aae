// Toolgate Engine — Best-Effort Aggregation
//
// Teardown and fan-out paths (remove, cleanup, health checks, catalog
// builds) must visit every provider even when some fail. `BestEffort`
// collects the failures, logs each one, and never raises.

use crate::atoms::error::EngineResult;
use log::warn;

#[derive(Debug)]
pub struct BestEffort {
    context: String,
    failures: Vec<String>,
}

impl BestEffort {
    pub fn new(context: impl Into<String>) -> Self {
        BestEffort { context: context.into(), failures: Vec::new() }
    }

    /// Keep the value on success; remember and log the error otherwise.
    pub fn record<T>(&mut self, label: &str, result: EngineResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[mcp] {}: {} failed: {}", self.context, label, e);
                self.failures.push(format!("{}: {}", label, e));
                None
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Consume the collector, returning every failure message.
    pub fn finish(self) -> Vec<String> {
        if !self.failures.is_empty() {
            warn!(
                "[mcp] {} finished with {} failure(s)",
                self.context,
                self.failures.len()
            );
        }
        self.failures
    }
}
