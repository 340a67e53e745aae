// Toolgate Engine — connection management for external tool servers.

pub mod config;
pub mod mcp;
