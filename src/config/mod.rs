//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! Every setting can come from either source; the command line wins.

pub mod cli;
pub mod toml;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port of worker node services
pub const DEFAULT_WORKER_PORT: u16 = 9999;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub integration: IntegrationConfig,
    pub pool: PoolConfig,
    pub output: OutputConfig,
}

/// What to integrate
///
/// Required values are optional here so that a config file can leave them to
/// the command line; [`validator::validate_config`] enforces presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegrationConfig {
    /// Integrand in `x`
    pub expression: Option<String>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Requested panel budget
    pub panels: Option<u64>,
    /// Tasks per worker slot
    pub oversubscription: usize,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            expression: None,
            lower: None,
            upper: None,
            panels: None,
            oversubscription: 1,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Local worker slots (None = number of logical CPUs, 0 = remote only)
    pub cpus: Option<usize>,
    /// Remote node addresses (`host` or `host:port`)
    pub nodes: Vec<String>,
    /// Port appended to addresses that don't carry one
    pub worker_port: u16,
    pub connect_timeout_secs: u64,
    /// Per-reply deadline for tasks (None = wait indefinitely)
    pub task_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cpus: None,
            nodes: Vec::new(),
            worker_port: DEFAULT_WORKER_PORT,
            connect_timeout_secs: 5,
            task_timeout_secs: None,
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Node addresses with the default port filled in, duplicates removed
    pub fn node_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let addr = with_port(node.trim(), self.worker_port);
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        }
        addresses
    }
}

/// Append `port` unless the address already names one
///
/// Bracketed IPv6 literals (`[::1]` or `[::1]:9000`) are handled; a bare
/// IPv6 literal without brackets is taken as-is.
pub fn with_port(addr: &str, port: u16) -> String {
    let keep = match addr.strip_prefix('[') {
        Some(rest) => rest.contains("]:"),
        None => addr.contains(':'),
    };

    if keep {
        addr.to_string()
    } else {
        format!("{}:{}", addr, port)
    }
}

/// Output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Write a JSON run report here
    pub json_output: Option<PathBuf>,
}

/// Read a hosts file: one address per line, blank lines and `#` comments skipped
pub fn read_hosts_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hosts file: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Build the effective configuration: config file (if any) overlaid with the CLI
pub fn load_config(cli: &cli::Cli) -> Result<Config> {
    let base = match cli.config {
        Some(ref path) => toml::parse_toml_file(path)?,
        None => Config::default(),
    };

    toml::merge_cli_with_config(cli, base)
}
