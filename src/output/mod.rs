//! Output formatting
//!
//! The result line on stdout and the optional JSON run report.

pub mod json;

/// Six-decimal fixed-point result line
pub fn format_result(value: f64) -> String {
    format!("{:.6}\n", value)
}
