//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Compute an integral (default)
    Run,
    /// Serve as a worker node for remote runs
    Service,
}

/// parquad - distributed numerical integration
#[derive(Parser, Debug)]
#[command(name = "parquad")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: run or service
    #[arg(long, value_enum, default_value = "run")]
    pub mode: ExecutionMode,

    /// Port for the worker service to listen on (service mode only)
    #[arg(long, default_value = "9999")]
    pub listen_port: u16,

    /// Integrand in x, e.g. "math.sin(x) ** 2" or "1 / (1 + x*x)"
    #[arg(short = 'e', long)]
    pub expression: Option<String>,

    /// Lower integration bound
    #[arg(long, allow_negative_numbers = true)]
    pub lower: Option<f64>,

    /// Upper integration bound
    #[arg(long, allow_negative_numbers = true)]
    pub upper: Option<f64>,

    /// Number of trapezoid panels (rounded down to a multiple of the task count)
    #[arg(short = 'n', long)]
    pub panels: Option<u64>,

    /// Local worker slots; defaults to the number of logical CPUs, 0 uses remote nodes only.
    /// In service mode this is the capacity the node advertises.
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Tasks created per worker slot
    #[arg(long)]
    pub oversubscribe: Option<usize>,

    /// Worker node addresses (host or host:port)
    #[arg(value_name = "ADDRESS")]
    pub addresses: Vec<String>,

    /// File containing worker node addresses (one per line)
    #[arg(long)]
    pub hosts_file: Option<PathBuf>,

    /// Port used for addresses that don't specify one
    #[arg(long, env = "PARQUAD_WORKER_PORT")]
    pub worker_port: Option<u16>,

    /// Seconds to wait when connecting to a worker node
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait for a worker reply before failing its tasks
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// TOML configuration file
    #[arg(short = 'c', long, env = "PARQUAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate mode-specific arguments
    ///
    /// Integration inputs are validated after merging with the config file.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.mode {
            ExecutionMode::Service => {
                if self.cpus == Some(0) {
                    anyhow::bail!("service capacity (--cpus) must be at least 1");
                }
                if self.expression.is_some() || !self.addresses.is_empty() {
                    anyhow::bail!("service mode takes no integration arguments or node addresses");
                }
            }
            ExecutionMode::Run => {
                if self.oversubscribe == Some(0) {
                    anyhow::bail!("--oversubscribe must be at least 1");
                }
            }
        }

        Ok(())
    }
}
