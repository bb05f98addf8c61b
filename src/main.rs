//! parquad CLI entry point

use anyhow::{Context, Result};
use parquad::config::cli::{Cli, ExecutionMode};
use parquad::config::{load_config, validator};
use parquad::output::{self, json::RunReport};
use parquad::IntegrationRequest;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();
    cli.validate()?;

    init_logging(&cli);

    match cli.mode {
        ExecutionMode::Run => run_integration(cli),
        ExecutionMode::Service => run_service(cli),
    }
}

/// Log to stderr; stdout carries only the result
fn init_logging(cli: &Cli) {
    let level = match (cli.mode, cli.debug) {
        (_, true) => "debug",
        (ExecutionMode::Service, false) => "info",
        (ExecutionMode::Run, false) => "warn",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,parquad={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Integrate and print the result
fn run_integration(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    // All input problems are reported before any connection is opened
    validator::validate_config(&config)
        .context("Configuration validation failed")?;
    let request = IntegrationRequest::from_config(&config.integration)?;

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let outcome = runtime.block_on(parquad::coordinator::integrate(&request, &config.pool))?;

    print!("{}", output::format_result(outcome.estimate.value));

    if let Some(ref path) = config.output.json_output {
        let report = RunReport::new(&request, &outcome);
        output::json::write_report(path, &report)?;
        tracing::info!("run report written to {}", path.display());
    }

    Ok(())
}

/// Serve as a worker node until killed
fn run_service(cli: Cli) -> Result<()> {
    let capacity = cli.cpus.unwrap_or_else(num_cpus::get);

    // Service mode uses tokio runtime
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let service = parquad::distributed::NodeService::new(cli.listen_port, capacity)
            .context("Failed to create node service")?;

        service.run().await
    })
}
