// Toolgate Engine — Control-Operation Rate Limiter
//
// Fixed-window counter keyed by operation name ("add_server", ...).
// A window opens on the first call after the previous one expired and lasts
// `window`; at most `max_ops` calls are admitted inside it.
//
// State is in-memory only and resets on process restart.

use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Counter for one operation key.
#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    reset_at: Instant,
}

impl WindowState {
    fn open(now: Instant, window: Duration) -> Self {
        WindowState { count: 1, reset_at: now + window }
    }

    fn expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// Shared rate limiter for control operations.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or reject one call of `operation`. Admitted calls are recorded.
    pub fn check(&self, operation: &str, max_ops: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        match windows.get_mut(operation) {
            None => {
                if max_ops == 0 {
                    return false;
                }
                windows.insert(operation.to_string(), WindowState::open(now, window));
                true
            }
            Some(state) if state.expired(now) => {
                if max_ops == 0 {
                    return false;
                }
                *state = WindowState::open(now, window);
                true
            }
            Some(state) if state.count < max_ops => {
                state.count += 1;
                true
            }
            Some(state) => {
                warn!(
                    "[mcp:security] Rate limit hit for '{}' ({} in window, resets in {:?})",
                    operation,
                    state.count,
                    state.reset_at.saturating_duration_since(now)
                );
                false
            }
        }
    }

    /// Time until `operation` may be admitted again, or zero if it may be now.
    pub fn retry_after(&self, operation: &str, max_ops: u32) -> Duration {
        let now = Instant::now();
        let windows = self.windows.lock();
        match windows.get(operation) {
            Some(state) if !state.expired(now) && state.count >= max_ops => {
                state.reset_at.saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }
}
