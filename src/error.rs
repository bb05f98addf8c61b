//! Error taxonomy
//!
//! - [`ConfigError`]: bad or missing input, detected before any connection
//! - [`DiscoveryError`]: no usable worker slots
//! - [`RunError`]: anything that stops a run, including failed tasks

use crate::expr::ParseError;
use crate::partition::{Partition, PartitionError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Required argument missing: --{0}")]
    Missing(&'static str),

    #[error("Invalid argument --{name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Invalid expression '{text}': {error}")]
    Expression { text: String, error: ParseError },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no reachable worker nodes and no local workers ({attempted} remote node(s) tried)")]
    NoCapacity { attempted: usize },

    #[error("failed to start local workers: {0}")]
    LocalExecutor(String),
}

/// A task that produced no value
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub partition: Partition,
    pub node: String,
    pub reason: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partition {} [{}, {}] on {}: {}",
            self.partition.index, self.partition.lower, self.partition.upper, self.node, self.reason
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error("{failed} of {total} tasks failed ({skipped} not started); first failure: {first}")]
    TasksFailed {
        failed: usize,
        skipped: usize,
        total: usize,
        first: TaskFailure,
    },

    #[error("{missing} of {total} tasks were never executed: no worker slots left")]
    Incomplete { missing: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_argument_message() {
        assert_eq!(
            ConfigError::Missing("panels").to_string(),
            "Required argument missing: --panels"
        );
    }

    #[test]
    fn test_task_failure_message() {
        let err = RunError::TasksFailed {
            failed: 1,
            skipped: 2,
            total: 4,
            first: TaskFailure {
                partition: Partition { index: 1, lower: 0.5, upper: 1.0, panels: 10 },
                node: "local".to_string(),
                reason: "division by zero at x = 0.5".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "1 of 4 tasks failed (2 not started); first failure: partition 1 [0.5, 1] on local: division by zero at x = 0.5"
        );
    }
}
