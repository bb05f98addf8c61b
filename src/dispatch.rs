//! Dispatcher and aggregator
//!
//! One task per partition is pulled from a shared queue by per-slot drivers:
//! `capacity` drivers over the local executor and one driver per remote
//! connection that keeps up to `capacity` tasks in flight. Every outcome is
//! sent over a channel to a single collector, which owns the partial values.
//!
//! Values are stored by partition index and summed in index order once every
//! driver has finished, so a fixed partitioning gives a bitwise identical
//! estimate whatever order tasks complete in and whichever node ran them.
//!
//! After the first failure no further tasks are started. Tasks that are
//! already running finish, then the run fails with the lowest-index failure.
//! Failed tasks are never retried.

use crate::error::{RunError, TaskFailure};
use crate::expr::Expr;
use crate::partition::Partition;
use crate::pool::local::LocalExecutor;
use crate::pool::remote::{RemoteNode, Reply};
use crate::pool::{PoolContext, LOCAL_NODE};
use crate::request::IntegralEstimate;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Partitions not yet handed to a worker slot
struct TaskQueue {
    pending: Mutex<VecDeque<Partition>>,
}

impl TaskQueue {
    fn new(partitions: &[Partition]) -> Self {
        Self {
            pending: Mutex::new(partitions.iter().copied().collect()),
        }
    }

    fn pop(&self) -> Option<Partition> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Stop handing out tasks; returns how many were discarded
    fn close(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let discarded = pending.len();
        pending.clear();
        discarded
    }
}

struct TaskOutcome {
    partition: Partition,
    node: String,
    result: Result<f64, String>,
    elapsed: Duration,
}

/// A completed task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub partition: Partition,
    /// Node that computed it (`local` or a remote address)
    pub node: String,
    pub value: f64,
    /// Compute time as measured where the task ran
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub estimate: IntegralEstimate,
    /// One record per partition, in partition order
    pub records: Vec<TaskRecord>,
}

/// Integrate every partition on the pool and sum the results
///
/// Remote connections that fail during the run are dropped from `pool`;
/// the surviving ones are returned to it.
pub async fn run(
    pool: &mut PoolContext,
    integrand: &Expr,
    partitions: &[Partition],
) -> Result<RunSummary, RunError> {
    let total = partitions.len();
    let queue = Arc::new(TaskQueue::new(partitions));
    let integrand = Arc::new(integrand.clone());
    let deadline = pool.task_timeout();

    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut local_drivers = JoinSet::new();
    if let Some(ref executor) = pool.local {
        for _ in 0..executor.capacity() {
            local_drivers.spawn(drive_local(
                executor.clone(),
                integrand.clone(),
                queue.clone(),
                tx.clone(),
                deadline,
            ));
        }
    }

    let mut remote_drivers = JoinSet::new();
    for (position, node) in std::mem::take(&mut pool.remotes).into_iter().enumerate() {
        let driver = drive_remote(node, integrand.clone(), queue.clone(), tx.clone(), deadline);
        remote_drivers.spawn(async move { (position, driver.await) });
    }

    // The channel closes once every driver has returned
    drop(tx);

    let mut values: Vec<Option<f64>> = vec![None; total];
    let mut records = Vec::with_capacity(total);
    let mut failures = Vec::new();
    let mut skipped = 0;

    while let Some(outcome) = rx.recv().await {
        let index = outcome.partition.index;
        match outcome.result {
            Ok(value) => {
                debug!(index, node = %outcome.node, value, "task complete");
                if let Some(slot) = values.get_mut(index) {
                    *slot = Some(value);
                }
                records.push(TaskRecord {
                    partition: outcome.partition,
                    node: outcome.node,
                    value,
                    elapsed: outcome.elapsed,
                });
            }
            Err(reason) => {
                warn!(index, node = %outcome.node, "task failed: {}", reason);
                if failures.is_empty() {
                    skipped += queue.close();
                }
                failures.push(TaskFailure {
                    partition: outcome.partition,
                    node: outcome.node,
                    reason,
                });
            }
        }
    }

    while let Some(joined) = local_drivers.join_next().await {
        if let Err(e) = joined {
            warn!("local driver panicked: {}", e);
        }
    }

    let mut survivors = Vec::new();
    while let Some(joined) = remote_drivers.join_next().await {
        match joined {
            Ok((position, Some(node))) => survivors.push((position, node)),
            Ok((_, None)) => {}
            Err(e) => warn!("remote driver panicked: {}", e),
        }
    }
    survivors.sort_by_key(|(position, _)| *position);
    pool.remotes = survivors.into_iter().map(|(_, node)| node).collect();

    failures.sort_by_key(|failure| failure.partition.index);
    let failed = failures.len();
    if let Some(first) = failures.into_iter().next() {
        return Err(RunError::TasksFailed {
            failed,
            skipped: skipped + queue.close(),
            total,
            first,
        });
    }

    let missing = values.iter().filter(|value| value.is_none()).count();
    if missing > 0 {
        return Err(RunError::Incomplete { missing, total });
    }

    let value = values.iter().flatten().fold(0.0, |sum, part| sum + part);
    records.sort_by_key(|record| record.partition.index);

    Ok(RunSummary {
        estimate: IntegralEstimate { value },
        records,
    })
}

/// One local worker slot
async fn drive_local(
    executor: Arc<LocalExecutor>,
    integrand: Arc<Expr>,
    queue: Arc<TaskQueue>,
    outcomes: UnboundedSender<TaskOutcome>,
    deadline: Option<Duration>,
) {
    while let Some(partition) = queue.pop() {
        let start = Instant::now();
        let work = executor.execute(integrand.clone(), partition);
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or_else(|_| Err(format!("no result within {}s", limit.as_secs_f64()))),
            None => work.await,
        };

        let outcome = TaskOutcome {
            partition,
            node: LOCAL_NODE.to_string(),
            result,
            elapsed: start.elapsed(),
        };
        if outcomes.send(outcome).is_err() {
            break;
        }
    }
}

/// All task slots of one remote node
///
/// Returns the connection if it is still usable.
async fn drive_remote(
    mut node: RemoteNode,
    integrand: Arc<Expr>,
    queue: Arc<TaskQueue>,
    outcomes: UnboundedSender<TaskOutcome>,
    deadline: Option<Duration>,
) -> Option<RemoteNode> {
    let name = node.address().to_string();
    let failed = |partition: Partition, reason: String| TaskOutcome {
        partition,
        node: name.clone(),
        result: Err(reason),
        elapsed: Duration::ZERO,
    };

    if let Err(e) = node.send_integrand(&integrand).await {
        warn!(node = %name, "failed to send integrand: {:#}", e);
        return None;
    }

    let mut in_flight: BTreeMap<usize, Partition> = BTreeMap::new();
    loop {
        while in_flight.len() < node.capacity() {
            let Some(partition) = queue.pop() else { break };
            if let Err(e) = node.submit(&partition).await {
                let reason = format!("connection lost: {:#}", e);
                for lost in in_flight.into_values().chain(std::iter::once(partition)) {
                    let _ = outcomes.send(failed(lost, reason.clone()));
                }
                return None;
            }
            in_flight.insert(partition.index, partition);
        }

        if in_flight.is_empty() {
            return Some(node);
        }

        match node.next_reply(deadline).await {
            Ok(Reply::Done { index, value, elapsed }) => match in_flight.remove(&index) {
                Some(partition) => {
                    let _ = outcomes.send(TaskOutcome {
                        partition,
                        node: name.clone(),
                        result: Ok(value),
                        elapsed,
                    });
                }
                None => warn!(node = %name, index, "reply for a task that is not in flight"),
            },
            Ok(Reply::Failed { index, error }) => match in_flight.remove(&index) {
                Some(partition) => {
                    let _ = outcomes.send(failed(partition, error));
                }
                None => warn!(node = %name, index, "failure for a task that is not in flight"),
            },
            Err(e) => {
                let reason = format!("connection lost: {:#}", e);
                for lost in in_flight.into_values() {
                    let _ = outcomes.send(failed(lost, reason.clone()));
                }
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::distributed::node_service::spawn_test_node;
    use crate::distributed::protocol::*;
    use crate::expr::parse;
    use crate::partition::partition;
    use crate::pool::discover;
    use tokio::net::TcpListener;

    async fn local_pool(cpus: usize) -> PoolContext {
        discover(&PoolConfig {
            cpus: Some(cpus),
            ..PoolConfig::default()
        })
        .await
        .unwrap()
    }

    async fn integrate(
        pool: &mut PoolContext,
        source: &str,
        lower: f64,
        upper: f64,
        panels: u64,
        oversubscription: usize,
    ) -> Result<RunSummary, RunError> {
        let plan = partition(lower, upper, panels, pool.total_capacity(), oversubscription)?;
        run(pool, &parse(source).unwrap(), &plan.partitions).await
    }

    #[derive(Clone, Copy)]
    enum FakeNode {
        /// Accepts one task, then closes the connection
        Vanish,
        /// Accepts tasks and never answers
        Stall,
    }

    /// A node that completes the handshake and then misbehaves
    async fn spawn_fake_node(behaviour: FakeNode) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            match read_message(&mut stream).await.unwrap() {
                Some(Message::Discover(_)) => {}
                other => panic!("expected DISCOVER, got {:?}", other),
            }
            let capacity = CapacityMessage {
                protocol_version: PROTOCOL_VERSION,
                node_id: "fake".to_string(),
                capacity: 1,
            };
            write_message(&mut stream, &Message::Capacity(capacity)).await.unwrap();

            while let Ok(Some(msg)) = read_message(&mut stream).await {
                if matches!((behaviour, msg), (FakeNode::Vanish, Message::Task(_))) {
                    return;
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_linear_scenario() {
        let mut pool = local_pool(1).await;
        let summary = integrate(&mut pool, "x", 0.0, 2.0, 4, 1).await.unwrap();

        assert_eq!(summary.estimate.value, 2.0);
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].node, LOCAL_NODE);
    }

    #[tokio::test]
    async fn test_constant_gives_width() {
        let mut pool = local_pool(4).await;
        let summary = integrate(&mut pool, "1", 0.0, 2.0, 8, 1).await.unwrap();
        assert_eq!(summary.estimate.value, 2.0);

        let indices: Vec<usize> = summary.records.iter().map(|r| r.partition.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_domain_is_zero() {
        let mut pool = local_pool(3).await;
        let summary = integrate(&mut pool, "1 / (x - 1)", 1.0, 1.0, 1000, 2).await.unwrap();
        assert_eq!(summary.estimate.value, 0.0);
    }

    #[tokio::test]
    async fn test_too_few_panels_is_zero() {
        let mut pool = local_pool(4).await;
        // 3 panels over 4 tasks: every partition gets 0 panels
        let summary = integrate(&mut pool, "log(x)", -1.0, 1.0, 3, 1).await.unwrap();
        assert_eq!(summary.estimate.value, 0.0);
    }

    #[tokio::test]
    async fn test_failing_integrand_fails_run() {
        let mut pool = local_pool(2).await;
        let err = integrate(&mut pool, "1 / x", -1.0, 1.0, 4, 1).await.unwrap_err();

        match err {
            RunError::TasksFailed { failed, skipped, total, first } => {
                assert_eq!(total, 2);
                assert!(failed >= 1);
                assert_eq!(failed + skipped, 2);
                assert_eq!(first.partition.index, 0);
                assert_eq!(first.node, LOCAL_NODE);
                assert!(first.reason.contains("division by zero"), "{}", first.reason);
            }
            other => panic!("expected task failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_tasks_skipped_after_failure() {
        let mut pool = local_pool(1).await;
        // Partition 0 of 8 hits log(0); the single slot may already hold
        // partition 1 when the queue closes, the rest never start
        let err = integrate(&mut pool, "log(x)", 0.0, 1.0, 80, 8).await.unwrap_err();

        match err {
            RunError::TasksFailed { failed, skipped, total, .. } => {
                assert_eq!(total, 8);
                assert_eq!(failed, 1);
                assert!(skipped >= 6, "only {} skipped", skipped);
            }
            other => panic!("expected task failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_and_local_agree_bitwise() {
        let node = spawn_test_node(2).await;
        let mut mixed = discover(&PoolConfig {
            cpus: Some(1),
            nodes: vec![node.clone()],
            ..PoolConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(mixed.total_capacity(), 3);

        let mut local = local_pool(3).await;

        let source = "math.sin(x) ** 2 + x / 7";
        let remote_run = integrate(&mut mixed, source, -1.5, 2.5, 3000, 2).await.unwrap();
        let local_run = integrate(&mut local, source, -1.5, 2.5, 3000, 2).await.unwrap();

        assert_eq!(remote_run.estimate.value.to_bits(), local_run.estimate.value.to_bits());
        assert_eq!(remote_run.records.len(), 6);

        // Connection survives for reuse
        assert_eq!(mixed.nodes().len(), 2);
        mixed.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeat_runs_identical() {
        let node = spawn_test_node(3).await;
        let mut pool = discover(&PoolConfig {
            cpus: Some(2),
            nodes: vec![node],
            ..PoolConfig::default()
        })
        .await
        .unwrap();

        let first = integrate(&mut pool, "x ** 2", 0.0, 1.0, 10_000, 3).await.unwrap();
        let second = integrate(&mut pool, "x ** 2", 0.0, 1.0, 10_000, 3).await.unwrap();

        assert_eq!(first.estimate.value.to_bits(), second.estimate.value.to_bits());
        assert!((first.estimate.value - 1.0 / 3.0).abs() < 1e-6);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_failure_reported() {
        let node = spawn_test_node(2).await;
        let mut pool = discover(&PoolConfig {
            cpus: Some(0),
            nodes: vec![node.clone()],
            ..PoolConfig::default()
        })
        .await
        .unwrap();

        let err = integrate(&mut pool, "sqrt(x)", -1.0, 1.0, 100, 1).await.unwrap_err();
        match err {
            RunError::TasksFailed { first, .. } => {
                assert_eq!(first.partition.index, 0);
                assert_eq!(first.node, node);
                assert!(first.reason.contains("sqrt"), "{}", first.reason);
            }
            other => panic!("expected task failure, got {:?}", other),
        }

        // A task failure is not a connection failure
        assert_eq!(pool.nodes().len(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_node_disappears() {
        let node = spawn_fake_node(FakeNode::Vanish).await;
        let mut pool = discover(&PoolConfig {
            cpus: Some(0),
            nodes: vec![node.clone()],
            ..PoolConfig::default()
        })
        .await
        .unwrap();

        let err = integrate(&mut pool, "x", 0.0, 1.0, 30, 3).await.unwrap_err();
        match err {
            RunError::TasksFailed { failed, skipped, total, first } => {
                assert_eq!((failed, skipped, total), (1, 2, 3));
                assert_eq!(first.node, node);
                assert!(first.reason.starts_with("connection lost"), "{}", first.reason);
            }
            other => panic!("expected task failure, got {:?}", other),
        }

        assert!(pool.nodes().is_empty());
    }

    /// A node that completes the handshake, then resets its connection on request
    async fn spawn_resetting_node() -> (String, tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (reset_tx, reset_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_message(&mut stream).await.unwrap();
            let capacity = CapacityMessage {
                protocol_version: PROTOCOL_VERSION,
                node_id: "fake".to_string(),
                capacity: 1,
            };
            write_message(&mut stream, &Message::Capacity(capacity)).await.unwrap();

            let _ = reset_rx.await;
            stream.set_linger(Some(Duration::ZERO)).unwrap();
            drop(stream);
        });

        (addr, reset_tx, handle)
    }

    #[tokio::test]
    async fn test_no_slots_left_is_incomplete() {
        let (node, reset, handle) = spawn_resetting_node().await;
        let mut pool = discover(&PoolConfig {
            cpus: Some(0),
            nodes: vec![node],
            ..PoolConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(pool.total_capacity(), 1);

        reset.send(()).unwrap();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = integrate(&mut pool, "x", 0.0, 1.0, 20, 2).await.unwrap_err();
        assert!(
            matches!(err, RunError::Incomplete { missing: 2, total: 2 }),
            "expected incomplete run, got {:?}",
            err
        );
        assert!(pool.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_task_timeout_is_failure() {
        let node = spawn_fake_node(FakeNode::Stall).await;
        let mut pool = discover(&PoolConfig {
            cpus: Some(0),
            nodes: vec![node],
            task_timeout_secs: Some(1),
            ..PoolConfig::default()
        })
        .await
        .unwrap();

        let err = integrate(&mut pool, "x", 0.0, 1.0, 10, 1).await.unwrap_err();
        match err {
            RunError::TasksFailed { first, .. } => {
                assert!(first.reason.contains("No reply within"), "{}", first.reason);
            }
            other => panic!("expected task failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queue_close_discards_pending() {
        let plan = partition(0.0, 1.0, 10, 5, 1).unwrap();
        let queue = TaskQueue::new(&plan.partitions);

        assert_eq!(queue.pop().map(|p| p.index), Some(0));
        assert_eq!(queue.close(), 4);
        assert_eq!(queue.pop(), None);
    }
}
