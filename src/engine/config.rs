// Toolgate Engine — Configuration
//
// Loads `toolgate.toml`: the security policy, registry limits and any
// provider definitions the host wants registered at startup.
//
//   [security]
//   allowed_commands = ["npx", "uvx"]
//   allowed_domains  = ["*.example.com"]
//   environment      = "production"
//
//   [registry]
//   max_connections = 10
//   add_rate_limit  = { max_ops = 5, window_secs = 60 }
//
//   [[providers]]
//   id = "fs"
//   name = "Filesystem"
//   command = "npx"
//   args = ["-y", "@modelcontextprotocol/server-filesystem", "./data"]
//
// Every field has a default, so an empty file (or no file) is valid.

use crate::atoms::constants::{
    ADD_SERVER_OPERATION, BLOCKED_SYSTEM_DIRS, DEFAULT_ADD_SERVER_MAX_OPS,
    DEFAULT_ADD_SERVER_WINDOW_SECS, DEFAULT_ALLOWED_COMMANDS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_TOOL_CALL_TIMEOUT_SECS,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ProviderConfig;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "TOOLGATE_CONFIG";
const CONFIG_FILE_NAME: &str = "toolgate.toml";

// ── Root ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolgateConfig {
    pub security: SecurityPolicy,
    pub registry: RegistrySettings,
    pub providers: Vec<ProviderConfig>,
}

impl ToolgateConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: ToolgateConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            debug!("[config] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        info!(
            "[config] Loaded {} ({} providers)",
            path.display(),
            config.providers.len()
        );
        Ok(config)
    }

    /// Resolve the config path (explicit > `TOOLGATE_CONFIG` > user config dir)
    /// and load it.
    pub fn load_default(explicit: Option<&Path>) -> EngineResult<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Sanity checks serde cannot express. Provider configs are validated
    /// later by the security gate, not here.
    fn check(&self) -> EngineResult<()> {
        if self.registry.max_connections == 0 {
            return Err(EngineError::Config("registry.max_connections must be at least 1".into()));
        }
        if self.registry.operation_timeout_secs == 0 || self.registry.tool_call_timeout_secs == 0 {
            return Err(EngineError::Config("registry timeouts must be non-zero".into()));
        }
        if self.registry.add_rate_limit.window_secs == 0 {
            return Err(EngineError::Config("registry.add_rate_limit.window_secs must be non-zero".into()));
        }
        for pattern in &self.security.extra_blocked_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                EngineError::Config(format!("invalid blocked pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// Where the config file lives, if anywhere.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|d| d.join("toolgate").join(CONFIG_FILE_NAME))
}

// ── [security] ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Runner programs a stdio provider may start.
    pub allowed_commands: Vec<String>,
    /// Additional regexes rejected in commands and arguments.
    pub extra_blocked_patterns: Vec<String>,
    /// Roots that path-like arguments must stay under. Empty means the
    /// working, temp and home directories.
    pub allowed_dirs: Vec<PathBuf>,
    /// Roots that path-like arguments must never enter.
    pub blocked_dirs: Vec<PathBuf>,
    /// Hosts remote providers may reach (`example.com` or `*.example.com`).
    /// Empty permits every host.
    pub allowed_domains: Vec<String>,
    /// Deployment environment; `production` forwards security events to the
    /// monitoring sink.
    pub environment: String,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicy {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect(),
            extra_blocked_patterns: Vec::new(),
            allowed_dirs: Vec::new(),
            blocked_dirs: BLOCKED_SYSTEM_DIRS.iter().map(PathBuf::from).collect(),
            allowed_domains: Vec::new(),
            environment: "development".into(),
        }
    }
}

// ── [registry] ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub max_connections: usize,
    pub operation_timeout_secs: u64,
    pub tool_call_timeout_secs: u64,
    pub add_rate_limit: RateLimitSettings,
}

impl RegistrySettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            tool_call_timeout_secs: DEFAULT_TOOL_CALL_TIMEOUT_SECS,
            add_rate_limit: RateLimitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub operation: String,
    pub max_ops: u32,
    pub window_secs: u64,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            operation: ADD_SERVER_OPERATION.into(),
            max_ops: DEFAULT_ADD_SERVER_MAX_OPS,
            window_secs: DEFAULT_ADD_SERVER_WINDOW_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::TransportKind;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_defaults() {
        let config = ToolgateConfig::from_toml_str("").unwrap();
        assert_eq!(config.registry.max_connections, 10);
        assert_eq!(config.registry.add_rate_limit.max_ops, 5);
        assert_eq!(config.registry.add_rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.registry.operation_timeout(), Duration::from_secs(30));
        assert!(config.security.allowed_commands.iter().any(|c| c == "npx"));
        assert!(config.security.allowed_domains.is_empty());
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_parse_providers_and_overrides() {
        let text = r#"
            [security]
            allowed_commands = ["uvx"]
            allowed_domains = ["*.example.com"]
            environment = "production"

            [registry]
            max_connections = 3
            add_rate_limit = { max_ops = 2, window_secs = 10 }

            [[providers]]
            id = "remote"
            name = "Remote"
            transport = "streamable-http"
            url = "https://tools.example.com/mcp"
            enabled = false
        "#;
        let config = ToolgateConfig::from_toml_str(text).unwrap();
        assert_eq!(config.security.allowed_commands, vec!["uvx".to_string()]);
        assert_eq!(config.security.environment, "production");
        assert_eq!(config.registry.max_connections, 3);
        assert_eq!(config.registry.add_rate_limit.max_ops, 2);
        assert_eq!(config.registry.add_rate_limit.operation, "add_server");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].transport, TransportKind::StreamableHttp);
        assert!(!config.providers[0].enabled);
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let err = ToolgateConfig::from_toml_str("[registry]\nmax_connections = 0").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_bad_blocked_pattern_rejected() {
        let err = ToolgateConfig::from_toml_str("[security]\nextra_blocked_patterns = [\"(\"]")
            .unwrap_err();
        assert!(err.to_string().contains("invalid blocked pattern"));
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolgateConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.registry.max_connections, 10);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[registry]\nmax_connections = 4").unwrap();
        let config = ToolgateConfig::load(file.path()).unwrap();
        assert_eq!(config.registry.max_connections, 4);
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = PathBuf::from("/tmp/custom.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }
}
