// Toolgate CLI — terminal host for the connection manager.
//
// Loads toolgate.toml, builds the registry, runs one subcommand and always
// tears every connection down before exiting.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use toolgate::commands::mcp as commands;
use toolgate::engine::config::CONFIG_ENV_VAR;
use toolgate::engine::mcp::defaults::default_providers;
use toolgate::{HostCapabilities, McpRegistry, ProviderConfig, SecurityGate, ToolgateConfig};

#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(about = "Connect to MCP tool servers and inspect their capability catalog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check provider definitions against the security policy without connecting
    Validate {
        /// A JSON file holding one provider or an array of providers.
        /// Without it, the providers in the config file are checked.
        file: Option<PathBuf>,
    },

    /// List the built-in provider definitions
    Defaults,

    /// Connect every enabled provider and print the merged catalog
    Catalog,

    /// Connect every enabled provider and report which ones answer
    Health,

    /// Invoke one capability by its namespaced key
    Call {
        /// Catalog key, `{providerId}_{capability}`
        key: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ToolgateConfig::load_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    match &cli.command {
        Command::Validate { file } => validate(&config, file.as_deref(), cli.json),
        Command::Defaults => {
            print_providers(&default_providers(), cli.json)?;
            Ok(())
        }
        Command::Catalog | Command::Health | Command::Call { .. } => {
            let registry = Arc::new(McpRegistry::from_config(&config, HostCapabilities::server())?);
            let result = run_connected(&registry, &cli).await;
            registry.cleanup().await;
            result
        }
    }
}

// ── Offline commands ───────────────────────────────────────────────────

fn validate(config: &ToolgateConfig, file: Option<&std::path::Path>, json: bool) -> anyhow::Result<()> {
    let providers: Vec<ProviderConfig> = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            if value.is_array() {
                serde_json::from_value(value)?
            } else {
                vec![serde_json::from_value(value)?]
            }
        }
        None => config.providers.clone(),
    };

    let gate = SecurityGate::new(&config.security)?;
    let mut failed = 0;
    let mut report = serde_json::Map::new();
    for provider in &providers {
        let result = gate.validate(provider);
        if !result.ok {
            failed += 1;
        }
        if json {
            report.insert(provider.id.clone(), serde_json::json!(result.errors));
        } else if result.ok {
            println!("ok    {}", provider.id);
        } else {
            println!("FAIL  {}", provider.id);
            for error in &result.errors {
                println!("        {}", error);
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if failed > 0 {
        bail!("{} of {} provider(s) failed validation", failed, providers.len());
    }
    Ok(())
}

fn print_providers(providers: &[ProviderConfig], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(providers)?);
        return Ok(());
    }
    for p in providers {
        println!("{:<14} {:<16} {}", p.id, p.transport.to_string(), p.description);
    }
    Ok(())
}

// ── Connected commands ─────────────────────────────────────────────────

async fn run_connected(registry: &McpRegistry, cli: &Cli) -> anyhow::Result<()> {
    connect_enabled(registry).await;

    match &cli.command {
        Command::Catalog => {
            let catalog = commands::get_catalog(registry).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                for entry in &catalog {
                    println!("{:<32} {}", entry.key, entry.description);
                }
                info!("{} capabilities from {} provider(s)", catalog.len(), registry.connected_ids().len());
            }
        }
        Command::Health => {
            let health = commands::health_check(registry).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                for (id, ok) in &health {
                    println!("{:<14} {}", id, if *ok { "healthy" } else { "unhealthy" });
                }
            }
        }
        Command::Call { key, args } => {
            let args: serde_json::Value =
                serde_json::from_str(args).context("--args must be valid JSON")?;
            let output = commands::call_capability(registry, key, args).await?;
            match output {
                serde_json::Value::String(text) => println!("{}", text),
                other => println!("{}", serde_json::to_string_pretty(&other)?),
            }
        }
        Command::Validate { .. } | Command::Defaults => {}
    }
    Ok(())
}

async fn connect_enabled(registry: &McpRegistry) {
    if commands::list_enabled_providers(registry).is_empty() {
        warn!("No enabled providers in the configuration");
        return;
    }
    let failures = commands::connect_enabled_providers(registry).await;
    if !failures.is_empty() {
        warn!("{} provider(s) could not be connected", failures.len());
    }
}
