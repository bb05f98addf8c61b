//! Node service
//!
//! Runs on each worker machine (`--mode service`). The node service:
//! - Listens for coordinator connections, one handler task per connection
//! - Answers capacity queries with its number of worker threads
//! - Integrates each received partition on its local thread pool
//! - Replies to tasks in completion order
//!
//! Several coordinators may be connected at once; they share the pool.

use crate::distributed::node_id;
use crate::distributed::protocol::*;
use crate::expr::Expr;
use crate::pool::local::LocalExecutor;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Node service
pub struct NodeService {
    /// Port to listen on
    listen_port: u16,

    /// Node identifier (hostname)
    node_id: String,

    executor: Arc<LocalExecutor>,
}

impl NodeService {
    /// Create a node service offering `capacity` task slots
    pub fn new(listen_port: u16, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            anyhow::bail!("Node capacity must be at least 1");
        }

        let executor = LocalExecutor::new(capacity)
            .context("Failed to start worker threads")?;

        Ok(Self {
            listen_port,
            node_id: node_id(),
            executor: Arc::new(executor),
        })
    }

    /// Bind on all interfaces and serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.listen_port);
        let listener = TcpListener::bind(&addr).await
            .with_context(|| format!("Failed to bind node service on {}", addr))?;

        self.serve(listener).await
    }

    /// Accept coordinator connections on an existing listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(
            node_id = %self.node_id,
            capacity = self.executor.capacity(),
            "node service listening on {}",
            listener.local_addr().context("Listener has no local address")?
        );

        loop {
            let (stream, peer) = listener.accept().await
                .context("Failed to accept connection")?;

            let node_id = self.node_id.clone();
            let executor = self.executor.clone();
            tokio::spawn(async move {
                info!(%peer, "coordinator connected");
                match handle_connection(stream, node_id, executor).await {
                    Ok(()) => info!(%peer, "coordinator disconnected"),
                    Err(e) => warn!(%peer, "connection ended with error: {:#}", e),
                }
            });
        }
    }
}

/// Serve one coordinator until it sends SHUTDOWN or disconnects
async fn handle_connection(
    stream: TcpStream,
    node_id: String,
    executor: Arc<LocalExecutor>,
) -> Result<()> {
    stream.set_nodelay(true)
        .context("Failed to set TCP_NODELAY")?;

    let (mut read_half, write_half) = stream.into_split();

    // Replies come from several task futures; one writer keeps frames whole
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_replies(write_half, rx));

    let mut integrand: Option<Arc<Expr>> = None;

    let result = loop {
        let msg = match read_message(&mut read_half).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        match msg {
            Message::Discover(discover) => {
                if discover.protocol_version != PROTOCOL_VERSION {
                    let error = ErrorMessage {
                        node_id: node_id.clone(),
                        error: format!(
                            "Protocol version mismatch: coordinator={}, node={}",
                            discover.protocol_version, PROTOCOL_VERSION
                        ),
                    };
                    let _ = tx.send(Message::Error(error));
                    break Err(anyhow::anyhow!("Protocol version mismatch"));
                }

                debug!(coordinator = %discover.coordinator_id, "capacity requested");
                let _ = tx.send(Message::Capacity(CapacityMessage {
                    protocol_version: PROTOCOL_VERSION,
                    node_id: node_id.clone(),
                    capacity: executor.capacity(),
                }));
            }
            Message::Integrand(msg) => {
                debug!(integrand = %msg.expression, "integrand received");
                integrand = Some(Arc::new(msg.expression));
            }
            Message::Task(task) => {
                let partition = task.partition;
                let Some(expression) = integrand.clone() else {
                    let _ = tx.send(Message::TaskFailed(TaskFailedMessage {
                        index: partition.index,
                        error: "no integrand received before task".to_string(),
                    }));
                    continue;
                };

                let executor = executor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let start = Instant::now();
                    let reply = match executor.execute(expression, partition).await {
                        Ok(value) => Message::TaskResult(TaskResultMessage {
                            index: partition.index,
                            value,
                            elapsed_ns: start.elapsed().as_nanos() as u64,
                        }),
                        Err(error) => {
                            debug!(index = partition.index, "task failed: {}", error);
                            Message::TaskFailed(TaskFailedMessage {
                                index: partition.index,
                                error,
                            })
                        }
                    };
                    let _ = tx.send(reply);
                });
            }
            Message::Shutdown => break Ok(()),
            other => {
                let error = ErrorMessage {
                    node_id: node_id.clone(),
                    error: format!("Unexpected message: {:?}", other),
                };
                let _ = tx.send(Message::Error(error));
                break Err(anyhow::anyhow!("Unexpected message from coordinator"));
            }
        }
    };

    // The writer drains once every in-flight task has replied
    drop(tx);
    writer.await
        .context("Reply writer panicked")??;

    result
}

async fn write_replies(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> Result<()> {
    while let Some(msg) = rx.recv().await {
        write_message(&mut write_half, &msg).await?;
    }
    Ok(())
}

/// Start a node service on an ephemeral loopback port
#[cfg(test)]
pub(crate) async fn spawn_test_node(capacity: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = NodeService::new(0, capacity).unwrap();
    tokio::spawn(service.serve(listener));
    addr.to_string()
}
