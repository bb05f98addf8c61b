//! JSON run report
//!
//! Written with `--json-output`. Captures the request, the partition plan,
//! the active nodes and every task next to the final estimate.

use crate::coordinator::RunOutcome;
use crate::pool::WorkerNode;
use crate::request::IntegrationRequest;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = d.as_micros() as u64;
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRequest {
    /// Integrand as given
    pub expression: String,
    /// Integrand as parsed, fully parenthesized
    pub parsed: String,
    pub lower: f64,
    pub upper: f64,
    pub panels: u64,
    pub oversubscription: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonPlan {
    pub parts: usize,
    pub requested_panels: u64,
    pub adjusted_panels: u64,
    pub panels_per_part: u64,
    pub dropped_panels: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonPartition {
    pub index: usize,
    pub lower: f64,
    pub upper: f64,
    pub panels: u64,
    pub node: String,
    pub value: f64,
    pub elapsed: JsonDuration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub request: JsonRequest,
    pub plan: JsonPlan,
    pub total_capacity: usize,
    pub nodes: Vec<WorkerNode>,
    pub partitions: Vec<JsonPartition>,
    pub result: f64,
    pub elapsed: JsonDuration,
}

impl RunReport {
    pub fn new(request: &IntegrationRequest, outcome: &RunOutcome) -> Self {
        let plan = &outcome.plan;

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            request: JsonRequest {
                expression: request.source().to_string(),
                parsed: request.expression().to_string(),
                lower: request.lower(),
                upper: request.upper(),
                panels: request.total_panels(),
                oversubscription: request.oversubscription(),
            },
            plan: JsonPlan {
                parts: plan.parts,
                requested_panels: plan.requested_panels,
                adjusted_panels: plan.adjusted_panels,
                panels_per_part: plan.panels_per_part,
                dropped_panels: plan.dropped_panels(),
            },
            total_capacity: outcome.nodes.iter().map(|node| node.capacity).sum(),
            nodes: outcome.nodes.clone(),
            partitions: outcome
                .records
                .iter()
                .map(|record| JsonPartition {
                    index: record.partition.index,
                    lower: record.partition.lower,
                    upper: record.partition.upper,
                    panels: record.partition.panels,
                    node: record.node.clone(),
                    value: record.value,
                    elapsed: JsonDuration::from_duration(record.elapsed),
                })
                .collect(),
            result: outcome.estimate.value,
            elapsed: JsonDuration::from_duration(outcome.elapsed),
        }
    }
}

/// Write a report as pretty-printed JSON
pub fn write_report(output_path: &Path, report: &RunReport) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .context("Failed to serialize run report")?;
    writeln!(writer)?;
    writer.flush()
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    Ok(())
}

/// Format duration in human-readable format
fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    }
}
