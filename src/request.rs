//! Integration request and result

use crate::config::validator::validate_integration;
use crate::config::IntegrationConfig;
use crate::error::ConfigError;
use crate::expr::{self, Expr};
use serde::Serialize;

/// A validated, immutable description of one integral
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationRequest {
    expression: Expr,
    source: String,
    lower: f64,
    upper: f64,
    total_panels: u64,
    oversubscription: usize,
}

impl IntegrationRequest {
    /// Build a request, parsing the integrand
    ///
    /// `upper < lower` is accepted and integrates to `0.0`.
    pub fn new(
        source: &str,
        lower: f64,
        upper: f64,
        total_panels: u64,
        oversubscription: usize,
    ) -> Result<Self, ConfigError> {
        let config = IntegrationConfig {
            expression: Some(source.to_string()),
            lower: Some(lower),
            upper: Some(upper),
            panels: Some(total_panels),
            oversubscription,
        };
        Self::from_config(&config)
    }

    pub fn from_config(config: &IntegrationConfig) -> Result<Self, ConfigError> {
        validate_integration(config)?;

        let source = config.expression.as_deref().ok_or(ConfigError::Missing("expression"))?;
        let lower = config.lower.ok_or(ConfigError::Missing("lower"))?;
        let upper = config.upper.ok_or(ConfigError::Missing("upper"))?;
        let total_panels = config.panels.ok_or(ConfigError::Missing("panels"))?;

        let expression = expr::parse(source).map_err(|error| ConfigError::Expression {
            text: source.to_string(),
            error,
        })?;

        Ok(Self {
            expression,
            source: source.to_string(),
            lower,
            upper,
            total_panels,
            oversubscription: config.oversubscription,
        })
    }

    pub fn expression(&self) -> &Expr {
        &self.expression
    }

    /// Integrand as the user wrote it
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn total_panels(&self) -> u64 {
        self.total_panels
    }

    pub fn oversubscription(&self) -> usize {
        self.oversubscription
    }
}

/// Final result of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntegralEstimate {
    pub value: f64,
}
