//! TOML configuration file parsing
//!
//! ```toml
//! [integration]
//! expression = "math.exp(-x * x)"
//! lower = -3.0
//! upper = 3.0
//! panels = 1_000_000
//! oversubscription = 2
//!
//! [pool]
//! cpus = 4
//! nodes = ["10.0.1.10", "10.0.1.11:7000"]
//! connect_timeout_secs = 5
//!
//! [output]
//! json_output = "run.json"
//! ```

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
///
/// Node addresses accumulate: file nodes first, then positional addresses,
/// then the hosts file.
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Integration
    if let Some(ref expression) = cli.expression {
        config.integration.expression = Some(expression.clone());
    }
    if let Some(lower) = cli.lower {
        config.integration.lower = Some(lower);
    }
    if let Some(upper) = cli.upper {
        config.integration.upper = Some(upper);
    }
    if let Some(panels) = cli.panels {
        config.integration.panels = Some(panels);
    }
    if let Some(oversubscription) = cli.oversubscribe {
        config.integration.oversubscription = oversubscription;
    }

    // Pool
    if let Some(cpus) = cli.cpus {
        config.pool.cpus = Some(cpus);
    }
    if let Some(port) = cli.worker_port {
        config.pool.worker_port = port;
    }
    if let Some(secs) = cli.connect_timeout {
        config.pool.connect_timeout_secs = secs;
    }
    if let Some(secs) = cli.task_timeout {
        config.pool.task_timeout_secs = Some(secs);
    }
    config.pool.nodes.extend(cli.addresses.iter().cloned());
    if let Some(ref hosts_file) = cli.hosts_file {
        config.pool.nodes.extend(read_hosts_file(hosts_file)?);
    }

    // Output
    if let Some(ref path) = cli.json_output {
        config.output.json_output = Some(path.clone());
    }

    Ok(config)
}
