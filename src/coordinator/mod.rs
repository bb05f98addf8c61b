//! Run coordinator
//!
//! One run: discover capacity, partition the domain, dispatch, release the
//! pool. The pool is always released, whether or not the run succeeded.

use crate::config::PoolConfig;
use crate::dispatch::{self, TaskRecord};
use crate::error::RunError;
use crate::partition::{partition, PartitionPlan};
use crate::pool::{self, PoolContext, WorkerNode};
use crate::request::{IntegralEstimate, IntegrationRequest};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything a finished run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub estimate: IntegralEstimate,
    pub plan: PartitionPlan,
    /// Nodes active at the start of dispatch
    pub nodes: Vec<WorkerNode>,
    pub records: Vec<TaskRecord>,
    /// Wall time from discovery to the final sum
    pub elapsed: Duration,
}

/// Integrate `request` on the pool described by `config`
pub async fn integrate(
    request: &IntegrationRequest,
    config: &PoolConfig,
) -> Result<RunOutcome, RunError> {
    let start = Instant::now();

    let mut pool = pool::discover(config).await?;
    let result = integrate_on(request, &mut pool).await;
    pool.shutdown().await;

    let mut outcome = result?;
    outcome.elapsed = start.elapsed();

    info!(
        value = outcome.estimate.value,
        elapsed_ms = outcome.elapsed.as_secs_f64() * 1000.0,
        "run complete"
    );
    Ok(outcome)
}

/// Integrate `request` on an already discovered pool
pub async fn integrate_on(
    request: &IntegrationRequest,
    pool: &mut PoolContext,
) -> Result<RunOutcome, RunError> {
    let start = Instant::now();
    let nodes = pool.nodes();

    let plan = partition(
        request.lower(),
        request.upper(),
        request.total_panels(),
        pool.total_capacity(),
        request.oversubscription(),
    )?;

    info!(
        parts = plan.parts,
        panels_per_part = plan.panels_per_part,
        adjusted_panels = plan.adjusted_panels,
        "domain partitioned"
    );
    if plan.dropped_panels() > 0 {
        debug!(
            requested = plan.requested_panels,
            dropped = plan.dropped_panels(),
            "panel budget rounded down to a multiple of the task count"
        );
    }

    if !request.expression().depends_on_x() {
        debug!(integrand = %request.expression(), "integrand is constant in x");
    }

    let summary = dispatch::run(pool, request.expression(), &plan.partitions).await?;

    Ok(RunOutcome {
        estimate: summary.estimate,
        plan,
        nodes,
        records: summary.records,
        elapsed: start.elapsed(),
    })
}
