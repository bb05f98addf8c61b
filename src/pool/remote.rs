//! Connection to a remote worker node
//!
//! One TCP connection per node, opened during discovery and kept for the
//! whole run. Tasks are pipelined: the dispatcher may submit up to
//! `capacity` partitions before reading replies, which arrive in completion
//! order.

use crate::distributed::node_id;
use crate::distributed::protocol::*;
use crate::expr::Expr;
use crate::partition::Partition;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Outcome of one remote task
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done { index: usize, value: f64, elapsed: Duration },
    Failed { index: usize, error: String },
}

#[derive(Debug)]
pub struct RemoteNode {
    /// Address as configured (`host:port`)
    address: String,

    /// Hostname reported by the node
    node_id: String,

    capacity: usize,

    stream: TcpStream,
}

impl RemoteNode {
    /// Connect and perform the capacity handshake
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self> {
        let mut stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .with_context(|| format!("Timed out connecting to {}", address))?
            .with_context(|| format!("Failed to connect to {}", address))?;

        stream.set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;

        let discover = DiscoverMessage {
            protocol_version: PROTOCOL_VERSION,
            coordinator_id: node_id(),
        };
        write_message(&mut stream, &Message::Discover(discover)).await?;

        let reply = timeout(connect_timeout, read_message(&mut stream))
            .await
            .with_context(|| format!("Timed out waiting for capacity from {}", address))??;

        let capacity = match reply {
            Some(Message::Capacity(msg)) => {
                if msg.protocol_version != PROTOCOL_VERSION {
                    anyhow::bail!(
                        "Protocol version mismatch: coordinator={}, node={}",
                        PROTOCOL_VERSION,
                        msg.protocol_version
                    );
                }
                msg
            }
            Some(Message::Error(err)) => anyhow::bail!("Node {} refused: {}", err.node_id, err.error),
            Some(other) => anyhow::bail!("Expected CAPACITY message, got {:?}", other),
            None => anyhow::bail!("Connection closed during handshake"),
        };

        Ok(Self {
            address: address.to_string(),
            node_id: capacity.node_id,
            capacity: capacity.capacity,
            stream,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Advertised concurrent task slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Send the integrand used by all following tasks
    pub async fn send_integrand(&mut self, expression: &Expr) -> Result<()> {
        let msg = Message::Integrand(IntegrandMessage {
            expression: expression.clone(),
        });
        write_message(&mut self.stream, &msg).await
    }

    pub async fn submit(&mut self, partition: &Partition) -> Result<()> {
        let msg = Message::Task(TaskMessage {
            partition: *partition,
        });
        write_message(&mut self.stream, &msg).await
    }

    /// Wait for the next task reply
    ///
    /// With a deadline, an overdue reply is an error; the connection should
    /// not be reused afterwards since the late reply may still arrive.
    pub async fn next_reply(&mut self, deadline: Option<Duration>) -> Result<Reply> {
        let msg = match deadline {
            Some(limit) => timeout(limit, read_message(&mut self.stream))
                .await
                .with_context(|| format!("No reply within {}s", limit.as_secs_f64()))??,
            None => read_message(&mut self.stream).await?,
        };

        match msg {
            Some(Message::TaskResult(result)) => Ok(Reply::Done {
                index: result.index,
                value: result.value,
                elapsed: Duration::from_nanos(result.elapsed_ns),
            }),
            Some(Message::TaskFailed(failed)) => Ok(Reply::Failed {
                index: failed.index,
                error: failed.error,
            }),
            Some(Message::Error(err)) => anyhow::bail!("Node reported error: {}", err.error),
            Some(other) => anyhow::bail!("Unexpected message: {:?}", other),
            None => anyhow::bail!("Connection closed by node"),
        }
    }

    /// Tell the node the run is over and close the connection
    pub async fn shutdown(mut self) -> Result<()> {
        write_message(&mut self.stream, &Message::Shutdown).await
    }
}
