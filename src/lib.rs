//! parquad - distributed numerical integration
//!
//! parquad approximates a definite integral of a single-variable expression
//! with the composite trapezoidal rule, splitting the domain into equal
//! partitions and computing them across a pool of local worker threads and
//! remote worker nodes.
//!
//! # Architecture
//!
//! - **Capacity discovery**: local slots plus one TCP connection per remote node
//! - **Partitioning**: `capacity * oversubscription` equal-width tasks
//! - **Dispatch**: fan-out over every slot, single collector, index-ordered sum
//! - **Safe integrands**: a small arithmetic grammar parsed into a tree; the
//!   tree, never the source text, is what remote nodes evaluate
//!
//! ```no_run
//! use parquad::{config::PoolConfig, coordinator, IntegrationRequest};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let request = IntegrationRequest::new("math.sin(x)", 0.0, std::f64::consts::PI, 1_000_000, 1)?;
//! let outcome = coordinator::integrate(&request, &PoolConfig::default()).await?;
//! print!("{}", parquad::output::format_result(outcome.estimate.value));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod distributed;
pub mod error;
pub mod expr;
pub mod output;
pub mod partition;
pub mod pool;
pub mod quadrature;
pub mod request;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, DiscoveryError, RunError};
pub use expr::Expr;
pub use request::{IntegralEstimate, IntegrationRequest};

/// Result type used at the binary and transport layers
pub type Result<T> = anyhow::Result<T>;
