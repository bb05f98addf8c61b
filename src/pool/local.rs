//! In-process worker slots
//!
//! Partitions run on a dedicated rayon pool so the tokio runtime never blocks
//! on integrand evaluation. The same executor backs the node service.

use crate::expr::Expr;
use crate::partition::Partition;
use crate::quadrature;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Integrate one partition with the trapezoid rule
pub fn integrate_partition(integrand: &Expr, partition: &Partition) -> Result<f64, String> {
    quadrature::trapezoid(
        |x| integrand.eval(x),
        partition.lower,
        partition.upper,
        partition.panels,
    )
    .map_err(|e| e.to_string())
}

pub struct LocalExecutor {
    pool: rayon::ThreadPool,
    capacity: usize,
}

impl LocalExecutor {
    pub fn new(capacity: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(capacity)
            .thread_name(|i| format!("parquad-worker-{}", i))
            // A panicking task drops its reply channel and fails on its own
            .panic_handler(|_| {})
            .build()?;

        Ok(Self { pool, capacity })
    }

    /// Worker threads (concurrent task slots)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run one partition on the pool and wait for its value
    pub async fn execute(&self, integrand: Arc<Expr>, partition: Partition) -> Result<f64, String> {
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            let _ = tx.send(integrate_partition(&integrand, &partition));
        });

        rx.await
            .map_err(|_| "worker thread panicked".to_string())?
    }
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    fn partition(lower: f64, upper: f64, panels: u64) -> Partition {
        Partition { index: 0, lower, upper, panels }
    }

    #[test]
    fn test_integrate_partition() {
        let integrand = parse("x").unwrap();
        assert_eq!(integrate_partition(&integrand, &partition(0.0, 2.0, 4)), Ok(2.0));
    }

    #[test]
    fn test_zero_panels_skip_singularity() {
        let integrand = parse("1 / x").unwrap();
        assert_eq!(integrate_partition(&integrand, &partition(0.0, 1.0, 0)), Ok(0.0));
    }

    #[test]
    fn test_failure_names_the_point() {
        let integrand = parse("log(x)").unwrap();
        let err = integrate_partition(&integrand, &partition(0.0, 1.0, 10)).unwrap_err();
        assert!(err.contains("log"), "{}", err);
        assert!(err.ends_with("at x = 0"), "{}", err);
    }

    #[tokio::test]
    async fn test_execute_on_pool() {
        let executor = LocalExecutor::new(2).unwrap();
        assert_eq!(executor.capacity(), 2);

        let integrand = Arc::new(parse("3").unwrap());
        let value = executor.execute(integrand, partition(1.0, 5.0, 4)).await.unwrap();
        assert_eq!(value, 12.0);
    }
}
