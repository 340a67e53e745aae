// Toolgate Engine — Security Gate
//
// Everything a provider config must pass before a transport is opened:
//   • schema checks (id, name, description, transport-specific fields)
//   • command allow-list + dangerous-pattern block-list (stdio)
//   • URL scheme and domain allow-list (remote transports)
//   • argument sanitization and path confinement
//   • environment variable names
// plus the control-operation rate limiter and the execution timeout wrapper.
//
// A config passes whole or is rejected whole; every violated rule is reported.

use super::audit::SecurityAuditor;
use super::rate_limit::RateLimiter;
use crate::atoms::constants::{
    BLOCKED_ENV_VARS, PROVIDER_DESCRIPTION_MAX_LEN, PROVIDER_ID_MAX_LEN, PROVIDER_NAME_MAX_LEN,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ProviderConfig, TransportKind};
use crate::engine::config::SecurityPolicy;
use log::{debug, warn};
use regex::Regex;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Characters stripped from every subprocess argument.
const SHELL_METACHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\', '\n', '\r',
];

/// Patterns rejected anywhere in a stdio command line.
const BLOCKED_COMMAND_PATTERNS: &[(&str, &str)] = &[
    (r"(;|&&|\|\||\||`|\$\()", "shell command chaining"),
    (r"(?i)\b(sudo|su|doas)\b", "privilege escalation"),
    (r"(?i)\brm\s+-[a-z]*(r[a-z]*f|f[a-z]*r)", "recursive forced delete (rm -rf)"),
    (r"(?i)\brm\s+(-\S+\s+)*-(r|-recursive)\s+(-\S+\s+)*-(f|-force)\b", "recursive forced delete (rm -rf)"),
    (r"(?i)\bmkfs(\.[a-z0-9]+)?\b", "filesystem format (mkfs)"),
    (r"(?i)\bdd\s+if=", "raw disk copy (dd)"),
    (r"(?i)\bchmod\s+(-\S+\s+)*0?777\b", "world-writable permissions (chmod 777)"),
    (r"(?i)(>\s*|\bof=)/dev/", "write to device file"),
    (r"(?i)\b(curl|wget)\b", "remote download (curl/wget)"),
    (r"(?i)\b(ssh|telnet|nc|ncat|netcat)\b", "remote shell"),
];

/// Outcome of `SecurityGate::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        ValidationReport { ok: errors.is_empty(), errors }
    }

    /// `Ok(())` when the config passed, otherwise `EngineError::Validation`.
    pub fn into_result(self) -> EngineResult<()> {
        if self.ok {
            Ok(())
        } else {
            Err(EngineError::validation(self.errors))
        }
    }
}

struct BlockedPattern {
    regex: Regex,
    label: String,
}

/// Host pattern for the remote-domain allow-list: exact or `*.suffix`.
#[derive(Debug, Clone)]
struct DomainPattern {
    base: String,
    wildcard: bool,
}

impl DomainPattern {
    fn new(pattern: &str) -> Self {
        let pattern = pattern.trim().to_lowercase();
        match pattern.strip_prefix("*.") {
            Some(base) => DomainPattern { base: base.to_string(), wildcard: true },
            None => DomainPattern { base: pattern, wildcard: false },
        }
    }

    fn matches(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        if self.wildcard {
            host == self.base || host.ends_with(&format!(".{}", self.base))
        } else {
            host == self.base
        }
    }
}

/// The gate. Stateless apart from the rate-limit counters.
pub struct SecurityGate {
    allowed_commands: Vec<String>,
    blocked: Vec<BlockedPattern>,
    domains: Vec<DomainPattern>,
    allowed_dirs: Vec<PathBuf>,
    blocked_dirs: Vec<PathBuf>,
    id_pattern: Regex,
    env_name_pattern: Regex,
    rate_limiter: RateLimiter,
    auditor: SecurityAuditor,
}

impl SecurityGate {
    pub fn new(policy: &SecurityPolicy) -> EngineResult<Self> {
        let mut blocked = Vec::new();
        for (pattern, label) in BLOCKED_COMMAND_PATTERNS {
            blocked.push(BlockedPattern { regex: compile(pattern)?, label: label.to_string() });
        }
        for pattern in &policy.extra_blocked_patterns {
            blocked.push(BlockedPattern {
                regex: compile(pattern)?,
                label: format!("custom pattern '{}'", pattern),
            });
        }

        let allowed_dirs = if policy.allowed_dirs.is_empty() {
            default_allowed_dirs()
        } else {
            policy.allowed_dirs.iter().map(|d| normalize_lexical(&expand_home(d))).collect()
        };

        Ok(SecurityGate {
            allowed_commands: policy.allowed_commands.iter().map(|c| c.to_lowercase()).collect(),
            blocked,
            domains: policy.allowed_domains.iter().map(|d| DomainPattern::new(d)).collect(),
            allowed_dirs,
            blocked_dirs: policy.blocked_dirs.iter().map(|d| normalize_lexical(d)).collect(),
            id_pattern: compile(&format!("^[a-z0-9_-]{{1,{}}}$", PROVIDER_ID_MAX_LEN))?,
            env_name_pattern: compile(r"^[A-Za-z_][A-Za-z0-9_-]*$")?,
            rate_limiter: RateLimiter::new(),
            auditor: SecurityAuditor::new(policy.environment.clone()),
        })
    }

    pub fn with_auditor(mut self, auditor: SecurityAuditor) -> Self {
        self.auditor = auditor;
        self
    }

    pub fn auditor(&self) -> &SecurityAuditor {
        &self.auditor
    }

    // ── Validation ─────────────────────────────────────────────────────

    /// Check a provider config against every rule. Never short-circuits.
    pub fn validate(&self, config: &ProviderConfig) -> ValidationReport {
        let mut errors = Vec::new();

        self.check_schema(config, &mut errors);
        match config.transport {
            TransportKind::Stdio => self.check_stdio(config, &mut errors),
            TransportKind::Sse | TransportKind::StreamableHttp => {
                self.check_remote(config, &mut errors)
            }
        }
        self.check_env(config, &mut errors);

        if !errors.is_empty() {
            debug!("[mcp:security] '{}' failed validation: {:?}", config.id, errors);
        }
        ValidationReport::from_errors(errors)
    }

    fn check_schema(&self, config: &ProviderConfig, errors: &mut Vec<String>) {
        if config.id.is_empty() {
            errors.push("id is required".into());
        } else if !self.id_pattern.is_match(&config.id) {
            errors.push(format!(
                "id '{}' must be 1-{} characters of lowercase letters, digits, '-' or '_'",
                config.id, PROVIDER_ID_MAX_LEN
            ));
        }

        let name_len = config.name.trim().chars().count();
        if name_len == 0 {
            errors.push("name is required".into());
        } else if config.name.chars().count() > PROVIDER_NAME_MAX_LEN {
            errors.push(format!("name must be at most {} characters", PROVIDER_NAME_MAX_LEN));
        }

        if config.description.chars().count() > PROVIDER_DESCRIPTION_MAX_LEN {
            errors.push(format!(
                "description must be at most {} characters",
                PROVIDER_DESCRIPTION_MAX_LEN
            ));
        }
    }

    fn check_stdio(&self, config: &ProviderConfig, errors: &mut Vec<String>) {
        if config.url.is_some() {
            errors.push("url is only valid for remote transports".into());
        }

        let command = match config.command.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => {
                errors.push("command is required for stdio transport".into());
                return;
            }
        };

        let (program, _) = split_command(command);
        if !self.is_allowed_command(&program) {
            errors.push(format!(
                "Command '{}' is not allowed (allowed: {})",
                program,
                self.allowed_commands.join(", ")
            ));
        }

        let command_line = std::iter::once(command)
            .chain(config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        for label in self.blocked_matches(&command_line) {
            errors.push(format!("Command line contains blocked pattern: {}", label));
        }

        if let Err(EngineError::Validation { errors: arg_errors }) =
            self.sanitize_command(command, &config.args)
        {
            errors.extend(arg_errors);
        }
    }

    fn check_remote(&self, config: &ProviderConfig, errors: &mut Vec<String>) {
        if config.command.is_some() || !config.args.is_empty() {
            errors.push("command and args are only valid for stdio transport".into());
        }

        let raw = match config.url.as_deref().map(str::trim) {
            Some(u) if !u.is_empty() => u,
            _ => {
                errors.push(format!("url is required for {} transport", config.transport));
                return;
            }
        };

        if let Err(reason) = self.check_url(raw) {
            errors.push(reason);
        }
    }

    fn check_env(&self, config: &ProviderConfig, errors: &mut Vec<String>) {
        let mut names: Vec<&String> = config.env.keys().collect();
        names.sort();
        for name in names {
            if !self.env_name_pattern.is_match(name) {
                errors.push(format!("Invalid environment variable name '{}'", name));
            } else if BLOCKED_ENV_VARS.iter().any(|b| b.eq_ignore_ascii_case(name)) {
                errors.push(format!("Environment variable '{}' is not allowed", name));
            }
        }
    }

    /// Scheme must be http(s); host must be on the allow-list when one is set.
    pub fn check_url(&self, raw: &str) -> Result<url::Url, String> {
        let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid url '{}': {}", raw, e))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(format!("URL scheme '{}' is not allowed (use http or https)", other)),
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| format!("URL '{}' has no host", raw))?;
        if !self.domains.is_empty() && !self.domains.iter().any(|d| d.matches(host)) {
            return Err(format!("Domain '{}' is not in the allowed domain list", host));
        }
        Ok(parsed)
    }

    /// Whether `program` (a path or bare name) is an allow-listed runner.
    /// Accepts versioned names (`python3.12`) and Windows suffixes (`npx.cmd`).
    pub fn is_allowed_command(&self, program: &str) -> bool {
        let file_name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program)
            .to_lowercase();
        let base = [".exe", ".cmd", ".bat"]
            .iter()
            .find_map(|ext| file_name.strip_suffix(ext))
            .unwrap_or(&file_name);

        self.allowed_commands.iter().any(|allowed| {
            if base == allowed {
                return true;
            }
            match base.strip_prefix(allowed.as_str()) {
                Some(rest) => {
                    let rest = rest.strip_prefix('-').unwrap_or(rest);
                    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '.')
                }
                None => false,
            }
        })
    }

    fn blocked_matches(&self, text: &str) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for pattern in &self.blocked {
            if pattern.regex.is_match(text) && !labels.contains(&pattern.label.as_str()) {
                labels.push(&pattern.label);
            }
        }
        labels
    }

    // ── Sanitization ───────────────────────────────────────────────────

    /// Split `command` into program and inline arguments, then sanitize the
    /// inline arguments followed by `args`. The child is spawned with exactly
    /// the returned program and argument list.
    pub fn sanitize_command(&self, command: &str, args: &[String]) -> EngineResult<(String, Vec<String>)> {
        let (program, inline) = split_command(command);
        let all: Vec<String> = inline.into_iter().chain(args.iter().cloned()).collect();
        Ok((program, self.sanitize_args(&all)?))
    }

    /// Strip shell metacharacters from every argument and confine path-like
    /// arguments, including the value half of `--flag=value`. Paths come back
    /// normalized and absolute.
    pub fn sanitize_args(&self, args: &[String]) -> EngineResult<Vec<String>> {
        let mut out = Vec::with_capacity(args.len());
        let mut errors = Vec::new();

        for arg in args {
            let cleaned: String = arg.chars().filter(|c| !SHELL_METACHARS.contains(c)).collect();
            if cleaned != *arg {
                debug!("[mcp:security] Stripped shell metacharacters from argument");
            }
            if is_path_like(&cleaned) {
                match self.confine_path(&cleaned) {
                    Ok(path) => out.push(path.to_string_lossy().into_owned()),
                    Err(reason) => errors.push(reason),
                }
            } else if let Some((flag, value)) = cleaned.split_once('=').filter(|(_, v)| is_path_like(v)) {
                match self.confine_path(value) {
                    Ok(path) => out.push(format!("{}={}", flag, path.display())),
                    Err(reason) => errors.push(reason),
                }
            } else {
                out.push(cleaned);
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(EngineError::validation(errors))
        }
    }

    /// Resolve a path-like argument and check it against the directory lists.
    /// When both lists match, the more specific root decides.
    fn confine_path(&self, raw: &str) -> Result<PathBuf, String> {
        let expanded = expand_home(Path::new(raw));
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()
                .map_err(|e| format!("Cannot resolve relative path '{}': {}", raw, e))?
                .join(expanded)
        };
        let path = normalize_lexical(&absolute);

        let depth = |roots: &[PathBuf]| {
            roots
                .iter()
                .filter(|root| path.starts_with(root))
                .map(|root| root.components().count())
                .max()
        };

        let allowed = depth(&self.allowed_dirs);
        let blocked = depth(&self.blocked_dirs);
        match (allowed, blocked) {
            (_, Some(b)) if allowed.map_or(true, |a| a <= b) => Err(format!(
                "Path '{}' points into a blocked system directory",
                path.display()
            )),
            (None, _) => Err(format!(
                "Path '{}' is outside the allowed directories",
                path.display()
            )),
            _ => Ok(path),
        }
    }

    // ── Rate limiting ──────────────────────────────────────────────────

    /// Admit or reject one call of `operation`. Admitted calls are counted.
    pub fn check_rate_limit(&self, operation: &str, max_ops: u32, window: Duration) -> bool {
        self.rate_limiter.check(operation, max_ops, window)
    }
}

/// Race `fut` against a timer. On expiry the future is dropped and
/// `EngineError::Timeout` is returned.
pub async fn run_with_timeout<T, F>(operation: &str, after: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("[mcp] Operation '{}' timed out after {:?}", operation, after);
            Err(EngineError::timeout(operation, after))
        }
    }
}

/// Split a command string into program and any inline arguments.
pub fn split_command(command: &str) -> (String, Vec<String>) {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

// ── Path helpers ───────────────────────────────────────────────────────

fn is_path_like(arg: &str) -> bool {
    arg.starts_with('/') || arg.starts_with("./") || arg.starts_with("../") || arg.starts_with('~')
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Resolve `.` and `..` without touching the filesystem. `..` never climbs
/// above the root.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components.last().is_some_and(|c| matches!(c, Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

fn default_allowed_dirs() -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs_out.push(normalize_lexical(&cwd));
    }
    dirs_out.push(normalize_lexical(&std::env::temp_dir()));
    if let Some(home) = dirs::home_dir() {
        dirs_out.push(normalize_lexical(&home));
    }
    dirs_out
}

fn compile(pattern: &str) -> EngineResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| EngineError::Config(format!("invalid pattern '{}': {}", pattern, e)))
}
