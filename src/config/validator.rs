//! Configuration validation

use super::*;
use crate::error::ConfigError;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_integration(&config.integration)?;
    validate_pool(&config.pool)?;
    validate_output(&config.output)?;

    Ok(())
}

/// Validate integration inputs
///
/// Checks presence first, in the order the original usage text lists them.
pub fn validate_integration(integration: &IntegrationConfig) -> Result<(), ConfigError> {
    let expression = integration
        .expression
        .as_deref()
        .ok_or(ConfigError::Missing("expression"))?;
    if expression.trim().is_empty() {
        return Err(ConfigError::Missing("expression"));
    }

    let lower = integration.lower.ok_or(ConfigError::Missing("lower"))?;
    let upper = integration.upper.ok_or(ConfigError::Missing("upper"))?;
    let panels = integration.panels.ok_or(ConfigError::Missing("panels"))?;

    if !lower.is_finite() {
        return Err(ConfigError::invalid("lower", format!("bound must be finite, got {}", lower)));
    }
    if !upper.is_finite() {
        return Err(ConfigError::invalid("upper", format!("bound must be finite, got {}", upper)));
    }
    if !(upper - lower).is_finite() {
        return Err(ConfigError::invalid("upper", "integration range overflows"));
    }

    if panels == 0 {
        return Err(ConfigError::invalid("panels", "must be at least 1"));
    }

    if integration.oversubscription == 0 {
        return Err(ConfigError::invalid("oversubscribe", "must be at least 1"));
    }

    Ok(())
}

/// Validate worker pool settings
pub fn validate_pool(pool: &PoolConfig) -> Result<(), ConfigError> {
    if pool.cpus == Some(0) && pool.nodes.is_empty() {
        return Err(ConfigError::invalid(
            "cpus",
            "0 local workers requires at least one node address",
        ));
    }

    for node in &pool.nodes {
        let node = node.trim();
        if node.is_empty() || node.contains(char::is_whitespace) {
            return Err(ConfigError::invalid("nodes", format!("invalid node address '{}'", node)));
        }
    }

    if pool.worker_port == 0 {
        return Err(ConfigError::invalid("worker-port", "must not be 0"));
    }

    if pool.connect_timeout_secs == 0 {
        return Err(ConfigError::invalid("connect-timeout", "must be at least 1 second"));
    }

    if pool.task_timeout_secs == Some(0) {
        return Err(ConfigError::invalid("task-timeout", "must be at least 1 second"));
    }

    Ok(())
}

/// Validate output settings
pub fn validate_output(output: &OutputConfig) -> Result<(), ConfigError> {
    if let Some(ref path) = output.json_output {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("json-output", "path must not be empty"));
        }
    }

    Ok(())
}
