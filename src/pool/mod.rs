//! Worker pool
//!
//! A [`PoolContext`] is created by [`discover`] at the start of a run, lent
//! to the dispatcher, and released with [`PoolContext::shutdown`]. It holds
//! the local executor (the implicit `local` node) and one open connection per
//! reachable remote node.

pub mod local;
pub mod remote;

use crate::config::PoolConfig;
use crate::error::DiscoveryError;
use local::LocalExecutor;
use remote::RemoteNode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Name of the implicit in-process node
pub const LOCAL_NODE: &str = "local";

/// A discovered node and its task slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerNode {
    pub address: String,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct PoolContext {
    pub(crate) local: Option<Arc<LocalExecutor>>,
    pub(crate) remotes: Vec<RemoteNode>,
    pub(crate) task_timeout: Option<Duration>,
}

/// Discover worker capacity
///
/// Remote nodes are contacted concurrently. Nodes that cannot be reached,
/// fail the handshake or offer no slots are left out with a warning.
pub async fn discover(config: &PoolConfig) -> Result<PoolContext, DiscoveryError> {
    let local_capacity = config.cpus.unwrap_or_else(num_cpus::get);
    let local = if local_capacity > 0 {
        let executor = LocalExecutor::new(local_capacity)
            .map_err(|e| DiscoveryError::LocalExecutor(e.to_string()))?;
        Some(Arc::new(executor))
    } else {
        None
    };

    let addresses = config.node_addresses();
    let connect_timeout = config.connect_timeout();

    let mut handshakes = JoinSet::new();
    for (position, address) in addresses.iter().cloned().enumerate() {
        handshakes.spawn(async move {
            let result = RemoteNode::connect(&address, connect_timeout).await;
            (position, address, result)
        });
    }

    let mut connected = Vec::with_capacity(addresses.len());
    while let Some(joined) = handshakes.join_next().await {
        let (position, address, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("node handshake task failed: {}", e);
                continue;
            }
        };

        match result {
            Ok(node) if node.capacity() == 0 => {
                warn!(node = %address, "node offers no task slots, skipping");
            }
            Ok(node) => {
                debug!(node = %address, node_id = node.node_id(), "handshake complete");
                connected.push((position, node));
            }
            Err(e) => {
                warn!(node = %address, "node unavailable: {:#}", e);
            }
        }
    }
    // Keep configuration order regardless of handshake completion order
    connected.sort_by_key(|(position, _)| *position);

    let pool = PoolContext {
        local,
        remotes: connected.into_iter().map(|(_, node)| node).collect(),
        task_timeout: config.task_timeout(),
    };

    if pool.total_capacity() == 0 {
        return Err(DiscoveryError::NoCapacity {
            attempted: addresses.len(),
        });
    }

    for node in pool.nodes() {
        info!(node = %node.address, capacity = node.capacity, "worker node active");
    }
    info!(total_capacity = pool.total_capacity(), "discovery complete");

    Ok(pool)
}

impl PoolContext {
    /// Active nodes, local first
    pub fn nodes(&self) -> Vec<WorkerNode> {
        let local = self.local.iter().map(|executor| WorkerNode {
            address: LOCAL_NODE.to_string(),
            capacity: executor.capacity(),
        });
        let remotes = self.remotes.iter().map(|node| WorkerNode {
            address: node.address().to_string(),
            capacity: node.capacity(),
        });
        local.chain(remotes).collect()
    }

    pub fn node_capacities(&self) -> BTreeMap<String, usize> {
        self.nodes()
            .into_iter()
            .map(|node| (node.address, node.capacity))
            .collect()
    }

    pub fn total_capacity(&self) -> usize {
        self.local.as_ref().map_or(0, |executor| executor.capacity())
            + self.remotes.iter().map(RemoteNode::capacity).sum::<usize>()
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    /// Release every remote connection
    pub async fn shutdown(self) {
        for node in self.remotes {
            let address = node.address().to_string();
            if let Err(e) = node.shutdown().await {
                debug!(node = %address, "shutdown not delivered: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::node_service::spawn_test_node;

    fn pool_config(cpus: usize, nodes: Vec<String>) -> PoolConfig {
        PoolConfig {
            cpus: Some(cpus),
            nodes,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_local_only() {
        let pool = discover(&pool_config(3, vec![])).await.unwrap();
        assert_eq!(pool.total_capacity(), 3);
        assert_eq!(
            pool.nodes(),
            vec![WorkerNode { address: LOCAL_NODE.to_string(), capacity: 3 }]
        );
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_local_capacity() {
        let config = PoolConfig::default();
        let pool = discover(&config).await.unwrap();
        assert_eq!(pool.total_capacity(), num_cpus::get());
    }

    #[tokio::test]
    async fn test_remote_nodes_counted() {
        let a = spawn_test_node(2).await;
        let b = spawn_test_node(5).await;

        let pool = discover(&pool_config(1, vec![a.clone(), b.clone()])).await.unwrap();
        assert_eq!(pool.total_capacity(), 8);

        let capacities = pool.node_capacities();
        assert_eq!(capacities.get(LOCAL_NODE), Some(&1));
        assert_eq!(capacities.get(&a), Some(&2));
        assert_eq!(capacities.get(&b), Some(&5));

        // Configuration order is kept
        let addresses: Vec<String> = pool.nodes().into_iter().map(|n| n.address).collect();
        assert_eq!(addresses, vec![LOCAL_NODE.to_string(), a, b]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_node_skipped() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let live = spawn_test_node(2).await;
        let pool = discover(&pool_config(0, vec![dead, live.clone()])).await.unwrap();

        assert_eq!(pool.total_capacity(), 2);
        assert_eq!(pool.nodes().len(), 1);
        assert_eq!(pool.nodes()[0].address, live);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_capacity_is_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = discover(&pool_config(0, vec![dead])).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoCapacity { attempted: 1 }));
    }
}
