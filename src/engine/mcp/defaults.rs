// Toolgate Engine — Built-in Provider Catalog
//
// Well-known MCP servers registered by `McpRegistry::initialize`. All of
// them start disabled; enabling one runs the full add path.

use crate::atoms::types::{ProviderCategory, ProviderConfig};

fn npx(id: &str, name: &str, package: &str, extra: &[String]) -> ProviderConfig {
    let mut args = vec!["-y".to_string(), package.to_string()];
    args.extend(extra.iter().cloned());
    ProviderConfig::stdio(id, name, "npx", args)
}

/// The default provider set, in display order.
pub fn default_providers() -> Vec<ProviderConfig> {
    let temp = std::env::temp_dir().to_string_lossy().into_owned();
    let sqlite_db = std::env::temp_dir().join("toolgate.db").to_string_lossy().into_owned();

    let mut providers = vec![
        npx("filesystem", "Filesystem", "@modelcontextprotocol/server-filesystem", &[temp])
            .with_description("Read and write files inside the sandbox directory")
            .with_category(ProviderCategory::Filesystem),
        npx("github", "GitHub", "@modelcontextprotocol/server-github", &[])
            .with_description("Repositories, issues and pull requests (needs GITHUB_PERSONAL_ACCESS_TOKEN)")
            .with_category(ProviderCategory::Development),
        npx("brave-search", "Brave Search", "@modelcontextprotocol/server-brave-search", &[])
            .with_description("Web search through the Brave Search API (needs BRAVE_API_KEY)")
            .with_category(ProviderCategory::Web),
        ProviderConfig::stdio("fetch", "Fetch", "uvx", vec!["mcp-server-fetch".into()])
            .with_description("Fetch a URL and convert it to markdown")
            .with_category(ProviderCategory::Web),
        npx("memory", "Memory", "@modelcontextprotocol/server-memory", &[])
            .with_description("Knowledge-graph memory that persists across sessions")
            .with_category(ProviderCategory::Productivity),
        ProviderConfig::stdio(
            "sqlite",
            "SQLite",
            "uvx",
            vec!["mcp-server-sqlite".into(), "--db-path".into(), sqlite_db],
        )
        .with_description("Query and modify a local SQLite database")
        .with_category(ProviderCategory::Database),
        npx("puppeteer", "Puppeteer", "@modelcontextprotocol/server-puppeteer", &[])
            .with_description("Headless browser automation")
            .with_category(ProviderCategory::Web),
    ];

    for provider in &mut providers {
        provider.enabled = false;
        provider.author = Some("Model Context Protocol".into());
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::SecurityPolicy;
    use crate::engine::mcp::security::SecurityGate;
    use std::collections::HashSet;

    #[test]
    fn test_defaults_disabled_and_unique() {
        let providers = default_providers();
        assert_eq!(providers.len(), 7);
        assert!(providers.iter().all(|p| !p.enabled));
        let ids: HashSet<_> = providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), providers.len());
        assert!(ids.contains("filesystem"));
    }

    #[test]
    fn test_defaults_pass_default_policy() {
        let gate = SecurityGate::new(&SecurityPolicy::default()).unwrap();
        for provider in default_providers() {
            let report = gate.validate(&provider);
            assert!(report.ok, "{}: {:?}", provider.id, report.errors);
        }
    }
}
